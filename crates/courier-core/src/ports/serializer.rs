//! Serializer port - Message と Content 列の相互変換
//!
//! ストアは Content を不透明なテキストとして扱い、
//! ここを通してのみ Message と相互変換します。

use crate::domain::{Message, StoreError};

/// Serializer は Message を Content 列のテキストに変換
pub trait Serializer: Send + Sync {
    fn serialize(&self, message: &Message) -> Result<String, StoreError>;

    fn deserialize(&self, content: &str) -> Result<Message, StoreError>;
}

/// serde_json による Serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, message: &Message) -> Result<String, StoreError> {
        Ok(serde_json::to_string(message)?)
    }

    fn deserialize(&self, content: &str) -> Result<Message, StoreError> {
        Ok(serde_json::from_str(content)?)
    }
}
