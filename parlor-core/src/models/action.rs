use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::Message;

/// Tipo di evento. Sul wire viaggia come intero (0, 1, 2) per compatibilità con i client esistenti.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Create = 0,
    Update = 1,
    Delete = 2,
}

impl TryFrom<u8> for ActionType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ActionType::Create),
            1 => Ok(ActionType::Update),
            2 => Ok(ActionType::Delete),
            other => Err(other),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl Serialize for ActionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ActionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        ActionType::try_from(raw)
            .map_err(|v| de::Error::custom(format!("unknown action type {v}")))
    }
}

/// Evento pubblicato sul topic ad ogni mutazione riuscita.
/// Per `Delete` il messaggio è lo snapshot precedente alla cancellazione.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(alias = "action_type")]
    pub action_type: ActionType,
    pub message: Message,
}

impl Action {
    pub fn create(message: Message) -> Self {
        Self { action_type: ActionType::Create, message }
    }

    pub fn update(message: Message) -> Self {
        Self { action_type: ActionType::Update, message }
    }

    pub fn delete(message: Message) -> Self {
        Self { action_type: ActionType::Delete, message }
    }
}
