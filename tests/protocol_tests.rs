//! Integration tests for protocol serialization

use planning_poker::error::PokerError;
use planning_poker::gateway::{Action, Mutation};
use planning_poker::model::Effort;
use planning_poker::protocol::{deserialize, serialize, ClientMessage, Request, ServerMessage};
use uuid::Uuid;

#[test]
fn test_error_kind_survives_the_wire() {
    let msg = ServerMessage::Reply {
        id: 7,
        result: Err(PokerError::not_found("session", "calm-otter-3")),
    };
    let encoded = serialize(&msg).expect("serialize failed");
    match deserialize::<ServerMessage>(&encoded).expect("deserialize failed") {
        ServerMessage::Reply { id, result } => {
            assert_eq!(id, 7);
            let err = result.unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(err.to_string(), "session not found: calm-otter-3");
        }
        other => panic!("expected Reply, got {:?}", other),
    }
}

#[test]
fn test_mutation_payload_is_typed() {
    let user = Uuid::new_v4();
    let msg = ClientMessage::Request {
        id: 1,
        request: Request::Mutate(Mutation {
            session_id: "calm-otter-3".to_string(),
            acting_user_id: user,
            action: Action::CastVote {
                effort: Effort::Coffee,
            },
        }),
    };
    let encoded = serialize(&msg).expect("serialize failed");
    match deserialize::<ClientMessage>(&encoded).expect("deserialize failed") {
        ClientMessage::Request {
            request: Request::Mutate(mutation),
            ..
        } => {
            assert_eq!(mutation.acting_user_id, user);
            assert_eq!(
                mutation.action,
                Action::CastVote {
                    effort: Effort::Coffee
                }
            );
        }
        other => panic!("expected Mutate, got {:?}", other),
    }
}

#[test]
fn test_effort_travels_as_its_token() {
    assert_eq!(serde_json::to_string(&Effort::Half).unwrap(), "\"0.5\"");
    assert_eq!(
        serde_json::from_str::<Effort>("\"13\"").unwrap(),
        Effort::Thirteen
    );
    assert!(serde_json::from_str::<Effort>("\"7\"").is_err());
}

#[test]
fn test_garbage_is_rejected() {
    assert!(deserialize::<ClientMessage>(&[0xc1, 0x00, 0xff]).is_err());
}
