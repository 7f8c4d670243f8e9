//! Рукопожатие ping/ready и команды звуков по data channel `ctrl`.

pub mod camera;
pub mod handshake;
pub mod monitor;
pub mod protocol;

pub use camera::CameraControl;
pub use handshake::Pinger;
pub use monitor::MonitorControl;
pub use protocol::ControlMessage;
