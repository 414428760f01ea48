//! Wire protocol for the exam-workflow queue.
//!
//! The backend speaks STOMP 1.2 over a SockJS endpoint. This crate has no
//! I/O; it only turns frames into text and back.
//!
//! # Layers
//!
//! - [`sockjs`]: transport framing (`o`, `h`, `a[...]`, `c[...]`)
//! - [`framing`]: STOMP frames inside SockJS messages (`COMMAND\nheaders\n\nbody\0`)
//! - [`destinations`]: the fixed topic/queue names and command bodies
//!
//! # Example
//!
//! ```rust
//! use examflow_protocol::{Frame, FrameDecoder, Inbound, QueueCommand, encode_frame};
//!
//! let command = QueueCommand::take_next("cardiology");
//! let frame = Frame::send(command.destination(), command.body().unwrap());
//! let wire = encode_frame(&frame);
//!
//! let mut decoder = FrameDecoder::new();
//! let decoded = decoder.push(wire.as_bytes());
//! match &decoded[..] {
//!     [Ok(Inbound::Frame(f))] => assert_eq!(f.body, frame.body),
//!     other => panic!("unexpected: {:?}", other),
//! }
//! ```

pub mod destinations;
mod error;
mod frame;
mod framing;
mod heartbeat;
pub mod sockjs;

pub use destinations::{CommandKind, QueueCommand};
pub use error::{ProtocolError, ProtocolResult};
pub use frame::{ACCEPT_VERSION, Frame, FrameCommand};
pub use framing::{FrameDecoder, HEARTBEAT, Inbound, encode_frame};
pub use heartbeat::{GRACE_FACTOR, HeartBeat, Negotiated, negotiate};
pub use sockjs::SockJsFrame;

/// Maximum inbound frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
