mod request;
mod response;
mod stream;

pub use request::{TranslatedRequest, openai_to_gemini};
pub use response::{gemini_to_openai, map_finish_reason};
pub use stream::StreamReframer;

pub(crate) fn new_completion_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("chatcmpl-{}", &hex[..12])
}

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}
