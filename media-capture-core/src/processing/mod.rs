pub mod cancellation;
pub mod media_queue;
pub mod pacer;
pub mod pcm16_converter;
