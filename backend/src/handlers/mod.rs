pub mod video_sessions;
pub mod video_token;
