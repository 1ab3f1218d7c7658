pub mod realtime;

// Re-export commonly used types for convenience
pub use realtime::{
    ConnectionState, EventBus, EventTranslator, FunctionCall, Gesture, InteractionState,
    StatusUpdate, ToolRegistry, TranscriptLog, VoiceChat, VoiceChatDrivers, VoiceChatError,
    VoiceChatEvent, VoiceChatResult,
};
