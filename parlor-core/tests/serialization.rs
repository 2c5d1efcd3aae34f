use parlor_core::*;
use serde_json::{self as json, Value};
use time::macros::datetime;
use uuid::Uuid;

fn parse(bytes: &[u8]) -> Value {
    json::from_slice(bytes).expect("valid json")
}

fn sample_message() -> Message {
    Message {
        id: Uuid::parse_str("33333333-3333-4333-8333-333333333333").unwrap(),
        body: "hello".to_string(),
        author: User {
            id: Uuid::parse_str("44444444-4444-4444-8444-444444444444").unwrap(),
            username: "User-44444444".to_string(),
        },
        created_at: datetime!(2025-11-02 10:20:35.123456789 UTC),
        updated_at: None,
    }
}

/*
    Obiettivo test: verificare che un'Action venga serializzata con i nomi camelCase del wire
    (actionType, createdAt, updatedAt) e che decode(encode(a)) restituisca la stessa Action,
    nanosecondi compresi.
*/
#[test]
fn action_roundtrip_uses_camel_case_wire_names() {
    let a = Action::create(sample_message());
    let bytes = encode(&a).expect("encode");
    let v = parse(&bytes);

    assert_eq!(v["actionType"], 0);
    assert_eq!(v["message"]["id"], "33333333-3333-4333-8333-333333333333");
    assert_eq!(v["message"]["author"]["username"], "User-44444444");
    assert_eq!(v["message"]["createdAt"], "2025-11-02T10:20:35.123456789Z");
    // updatedAt assente viene emesso come null, non omesso
    assert!(v["message"].as_object().unwrap().contains_key("updatedAt"));
    assert!(v["message"]["updatedAt"].is_null());
    assert!(v.get("action_type").is_none());

    let back = decode(&bytes).expect("decode");
    assert_eq!(back, a);
}

/*
    Obiettivo test: le tre varianti viaggiano come 0, 1, 2 e un messaggio aggiornato
    mantiene updatedAt dopo il round trip.
*/
#[test]
fn action_types_are_integers_on_the_wire() {
    let mut updated = sample_message();
    updated.body = "edited".to_string();
    updated.updated_at = Some(datetime!(2025-11-02 11:00:00 UTC));

    let cases = [
        (Action::create(sample_message()), 0),
        (Action::update(updated), 1),
        (Action::delete(sample_message()), 2),
    ];
    for (action, tag) in cases {
        let bytes = encode(&action).unwrap();
        assert_eq!(parse(&bytes)["actionType"], tag);
        assert_eq!(decode(&bytes).unwrap(), action);
    }
}

/*
    Obiettivo test: decode accetta anche i nomi snake_case e gli alias storici
    (publicatedAt per createdAt, user per author).
*/
#[test]
fn decode_accepts_snake_case_and_legacy_aliases() {
    let legacy = r#"{
        "action_type": 1,
        "message": {
            "id": "33333333-3333-4333-8333-333333333333",
            "body": "hello",
            "user": {"id": "44444444-4444-4444-8444-444444444444", "username": "User-44444444"},
            "publicatedAt": "2025-11-02T10:20:35.123456789Z",
            "updated_at": null
        }
    }"#;
    let a = decode(legacy.as_bytes()).expect("legacy payload");
    assert_eq!(a.action_type, ActionType::Update);
    assert_eq!(a.message, sample_message());

    let snake = r#"{"actionType": 2, "message": {
        "id": "33333333-3333-4333-8333-333333333333", "body": "hello",
        "author": {"id": "44444444-4444-4444-8444-444444444444", "username": "User-44444444"},
        "created_at": "2025-11-02T10:20:35.123456789Z"}}"#;
    let a = decode(snake.as_bytes()).expect("snake_case payload");
    assert_eq!(a.action_type, ActionType::Delete);
    assert_eq!(a.message.updated_at, None);
}

/*
    Obiettivo test: payload rotti o incompleti producono un DecodeError, mai un panic.
*/
#[test]
fn malformed_payloads_are_decode_errors() {
    let bad: [&[u8]; 6] = [
        b"",
        b"not json at all",
        br#"{"actionType": 7, "message": {}}"#,
        br#"{"actionType": 0}"#,
        br#"{"actionType": "create", "message": null}"#,
        br#"{"actionType": 0, "message": {"id": "nope", "body": "x", "author": {"username": "u"}, "createdAt": "2025-11-02T10:20:35Z"}}"#,
    ];
    for payload in bad {
        let err = decode(payload).expect_err("must be rejected");
        assert!(err.to_string().starts_with("malformed action payload"));
    }
}

/*
    Obiettivo test: la richiesta di creazione richiede solo body; id e autore sono opzionali
    e l'autore accetta anche l'alias "user". Un autore senza id ne riceve uno generato.
*/
#[test]
fn http_create_request_optional_fields() {
    let req: CreateMessageRequest = json::from_str(r#"{"body": "ciao"}"#).unwrap();
    assert_eq!(req.body, "ciao");
    assert!(req.id.is_none());
    assert!(req.author.is_none());

    let req: CreateMessageRequest =
        json::from_str(r#"{"body": "ciao", "user": {"username": "alice"}}"#).unwrap();
    let author = req.author.expect("author via alias");
    assert_eq!(author.username, "alice");
    assert_ne!(author.id, Uuid::nil());

    assert!(json::from_str::<CreateMessageRequest>(r#"{"id": null}"#).is_err());
}

/*
    Obiettivo test: la risposta della lista mantiene la chiave has_next e i messaggi in camelCase.
*/
#[test]
fn http_list_messages_response_shape() {
    let resp = ListMessagesResponse { has_next: true, messages: vec![sample_message()] };
    let s = json::to_vec(&resp).unwrap();
    let v = parse(&s);

    assert_eq!(v["has_next"], true);
    assert_eq!(v["messages"][0]["createdAt"], "2025-11-02T10:20:35.123456789Z");

    let back: ListMessagesResponse = json::from_slice(&s).unwrap();
    assert_eq!(back, resp);
}

/*
    Obiettivo test: il corpo d'errore condiviso omette details quando è vuoto.
*/
#[test]
fn error_body_omits_empty_details() {
    let err = Error::new("not_found", "message 1 not found");
    let v = parse(&json::to_vec(&err).unwrap());
    assert_eq!(v["code"], "not_found");
    assert!(v.get("details").is_none());
}

#[test]
fn placeholder_users_are_distinct() {
    let a = User::placeholder();
    let b = User::placeholder();
    assert_ne!(a.id, b.id);
    assert!(a.username.starts_with("User-"));
    assert_eq!(a.username.len(), "User-".len() + 8);
}
