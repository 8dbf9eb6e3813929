pub mod cmd;
pub mod framing;
pub mod logging;
