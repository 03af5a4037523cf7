pub mod endpoint;
pub mod guest;
pub mod request;
