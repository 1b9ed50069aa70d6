// Webhook 錄製與匹配引擎
// 監聽器把傳輸層事件分發給各錄製，錄製依匹配器判斷期望是否全部達成

pub mod error;
pub mod event;
pub mod harness;
pub mod listener;
pub mod matcher;
pub mod null_recording;
pub mod recording;
pub mod signature;

// 重新導出常用類型
pub use error::{WebhookError, WebhookResult};
pub use event::{PubSubEnvelope, SocketEnvelope, WebhookEvent};
pub use harness::WebhookHarness;
pub use listener::{Listener, ListenerOptions};
pub use matcher::{body_contains, from_async, from_fn, header_equals, named_fn, Matcher, MatcherId};
pub use null_recording::NullRecording;
pub use recording::{ConsumptionPolicy, EventRecording, MatcherState, Recording, RecordingId};
pub use signature::{sign, signature_matcher, verify_signature, SIGNATURE_HEADER};
