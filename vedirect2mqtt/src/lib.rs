// externally visible interfaces
pub mod frame;
pub mod frame_assembler;
pub mod metric_collector;
pub mod mqtt_config;
pub mod mqtt_wrapper;
pub mod simple_mqtt;
pub mod vedirect;
