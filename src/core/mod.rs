pub mod buffered;
pub mod ring_buffer;
pub mod source;
