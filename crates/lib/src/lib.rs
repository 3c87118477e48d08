//! hubrelay core library: webhook normalization, image relay, aggregator forwarding, and reply
//! dispatch, plus the HTTP gateway that ties them together.

pub mod channels;
pub mod config;
pub mod forward;
pub mod gateway;
pub mod init;
pub mod media;
pub mod normalize;
pub mod reply;
