//! Dossier client engine
//!
//! Keeps a local view of one research session in sync with the backend:
//! a reconnecting event stream, request/response resource calls, a pure
//! reducer over stream events, section edits and voice dictation.

pub mod composer;
pub mod config;
pub mod controller;
pub mod edit;
pub mod error;
pub mod reducer;
pub mod resources;
pub mod speech;
pub mod transport;
pub mod voice;

pub use composer::Composer;
pub use config::ClientConfig;
pub use controller::{ControllerEvent, SessionController};
pub use edit::{EditError, EditPhase, EditTransaction};
pub use error::{ClientError, ClientResult};
pub use reducer::{transition, Effect, ViewState};
pub use resources::{HttpResources, ResourceApi};
pub use speech::{speakable_text, LogSynthesizer, SpeechSynthesizer};
pub use transport::{
    Connection, ConnectionState, Connector, SessionTag, TransportEvent, TransportSink,
    WsConnection, WsConnector,
};
pub use voice::{
    CaptureError, Recognition, RecognitionEvent, RecognitionSink, SpeechRecognizer,
    UnsupportedRecognizer, VoiceCapture, VoiceState,
};
