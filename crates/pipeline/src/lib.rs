pub mod annotate;
pub mod controller;
pub mod detector;
pub mod metrics;
pub mod notify;
pub mod record;
pub mod session;
pub mod source;
pub mod store;

pub use controller::{ControllerState, SessionController, SessionStatus};
pub use detector::{Detector, NoopDetector, SharedDetector};
pub use notify::{NotificationDispatcher, NotificationSink};
pub use record::{BoundingBox, DetectionRecord, RawDetection};
pub use session::{AnnotatedFrame, InferenceSession, LoopSettings, SessionConfig, SessionError};
pub use source::{FrameSource, SourceError, SourceOpener, SourceSpec, SystemOpener};
pub use store::DetectionStore;
