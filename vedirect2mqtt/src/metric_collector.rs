use crate::frame::Frame;

pub trait MetricCollector {
    fn publish(&mut self, frame: &Frame);

    /// Called once before the process exits.
    fn shutdown(&mut self) {}
}
