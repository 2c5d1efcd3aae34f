/* Encoder/decoder delle Action che viaggiano sul bus e verso i client WS.
    Il payload è JSON con i nomi camelCase del wire; lo stesso testo viene
    inoltrato tale e quale come frame di testo al client.
*/
use thiserror::Error;

use crate::models::Action;

/// Payload del bus non interpretabile come `Action`. Non è mai fatale per una sessione.
#[derive(Debug, Error)]
#[error("malformed action payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Action non serializzabile (es. timestamp fuori dal range RFC3339).
#[derive(Debug, Error)]
#[error("cannot encode action: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Serializza un'Action nel payload pubblicato sul topic.
pub fn encode(action: &Action) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(action)?)
}

/// Come `encode` ma pronto per un frame di testo WebSocket.
pub fn encode_text(action: &Action) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(action)?)
}

/// Ricostruisce un'Action da un payload del bus.
pub fn decode(payload: &[u8]) -> Result<Action, DecodeError> {
    Ok(serde_json::from_slice(payload)?)
}
