//! Integration tests for end-to-end live sessions.
//!
//! These tests start a real server and connect real clients, verifying the
//! whole path from client event to engine and back out through the room.

use std::sync::Arc;

use agora_core::{Answer, Notice, ParticipantStatus, Presentation, Recovery, Slide, SlideKind};
use agora_live::catalog::MemoryCatalog;
use agora_live::client::{ConnectionState, LiveClient};
use agora_live::protocol::{ClientEvent, ProtocolError};
use agora_live::server::{LiveServer, ServerConfig};
use tokio::time::{timeout, Duration};
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(3);
const TOKEN: &str = "presenter-secret";

struct Deck {
    code: String,
    choice: Uuid,
    quiz: Uuid,
    qna: Uuid,
}

fn deck() -> (Presentation, Deck) {
    let choice = Slide::new(
        "Pick one",
        SlideKind::MultipleChoice { options: vec!["A".into(), "B".into()], allow_multiple: false },
    );
    let quiz = Slide::new(
        "2 + 2?",
        SlideKind::Quiz {
            options: vec!["3".into(), "4".into()],
            correct_option: 1,
            time_limit_secs: 1,
            max_points: 1000,
        },
    );
    let qna = Slide::new("Questions", SlideKind::Qna { allow_multiple: false });
    let code = format!("T{}", &Uuid::new_v4().simple().to_string()[..6]).to_ascii_uppercase();
    let ids = Deck {
        code: code.clone(),
        choice: choice.id,
        quiz: quiz.id,
        qna: qna.id,
    };
    let presentation = Presentation {
        id: Uuid::new_v4(),
        title: "Integration".into(),
        access_code: code,
        presenter_token: TOKEN.into(),
        slides: vec![choice, quiz, qna],
    };
    (presentation, ids)
}

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server with one presentation on a free port.
async fn start_test_server(max_participants: usize) -> (String, Deck) {
    let (presentation, ids) = deck();
    let mut catalog = MemoryCatalog::new();
    catalog.insert(presentation).unwrap();

    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_participants_per_room: max_participants,
        broadcast_capacity: 64,
        heartbeat_interval_secs: 30,
        catalog_path: None,
    };
    let server = LiveServer::new(config, Arc::new(catalog));
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("ws://127.0.0.1:{port}"), ids)
}

async fn connect(url: &str) -> LiveClient {
    let mut client = LiveClient::new(url);
    client.connect().await.unwrap();
    client
}

async fn presenter(url: &str, deck: &Deck) -> LiveClient {
    let mut client = connect(url).await;
    client
        .send(&ClientEvent::StartPresentation {
            access_code: Some(deck.code.clone()),
            presentation_id: None,
            presenter_token: TOKEN.into(),
        })
        .await
        .unwrap();
    client.expect("presentation-started", WAIT).await.unwrap();
    client
}

/// Participant id plus the resume token needed to re-attach to it.
#[derive(Debug, Clone, Copy)]
struct Seat {
    id: Uuid,
    token: Uuid,
}

fn join_event(deck: &Deck, name: &str, seat: Option<Seat>) -> ClientEvent {
    ClientEvent::JoinPresentation {
        access_code: deck.code.clone(),
        participant_id: seat.map(|s| s.id),
        resume_token: seat.map(|s| s.token),
        participant_name: name.into(),
    }
}

/// Join a live presentation; returns the client and its seat.
async fn participant(url: &str, deck: &Deck, name: &str) -> (LiveClient, Seat) {
    let mut client = connect(url).await;
    client.send(&join_event(deck, name, None)).await.unwrap();
    let frame = client.expect("joined-presentation", WAIT).await.unwrap();
    let Notice::JoinedPresentation(state) = frame.notice else {
        unreachable!()
    };
    (client, Seat { id: state.participant_id, token: state.resume_token })
}

fn pick_on(slide_id: Uuid, label: &str) -> ClientEvent {
    ClientEvent::SubmitResponse {
        presentation_id: None,
        slide_id,
        participant_id: None,
        answer: Answer::Choice(vec![label.into()]),
    }
}

async fn expect_error(client: &mut LiveClient) -> (String, Recovery) {
    let frame = client.expect("error", WAIT).await.unwrap();
    match frame.notice {
        Notice::Error { code, recovery, .. } => (code, recovery),
        other => panic!("expected error, got {other:?}"),
    }
}

/// Skip roster updates until `pid` shows up as admitted (or kicked).
async fn wait_for_roster(host: &mut LiveClient, pid: Uuid, admitted: bool) {
    loop {
        let frame = host.expect("participant-list-updated", WAIT).await.unwrap();
        let Notice::ParticipantListUpdated { participants, .. } = frame.notice else {
            unreachable!()
        };
        let entry = participants.iter().find(|p| p.participant_id == pid);
        if entry.is_some_and(|p| (p.status != ParticipantStatus::Kicked) == admitted) {
            return;
        }
    }
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let (url, _) = start_test_server(10).await;
    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");

    let client = connect(&url).await;
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_ping_pong() {
    let (url, _) = start_test_server(10).await;
    let mut client = connect(&url).await;
    client.send(&ClientEvent::Ping).await.unwrap();
    let frame = client.expect("pong", WAIT).await.unwrap();
    assert!(matches!(frame.notice, Notice::Pong { server_time } if server_time > 0));
}

#[tokio::test]
async fn test_unknown_access_code_and_malformed_frames() {
    let (url, _) = start_test_server(10).await;
    let mut client = connect(&url).await;

    client
        .send(&ClientEvent::JoinPresentation {
            access_code: "NOPE".into(),
            participant_id: None,
            resume_token: None,
            participant_name: "Ada".into(),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(&mut client).await, ("not-found".to_string(), Recovery::NotAllowed));

    // Raw socket for a frame the typed client cannot produce.
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;
    let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
    ws.send(Message::Text(r#"{"event":"launch-rockets"}"#.to_string().into())).await.unwrap();
    let reply = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let value: serde_json::Value = serde_json::from_str(reply.to_text().unwrap()).unwrap();
    assert_eq!(value["event"], "error");
    assert_eq!(value["data"]["code"], "validation");
    assert_eq!(value["data"]["recovery"], "retry");
}

#[tokio::test]
async fn test_waiting_participant_sees_presentation_go_live() {
    let (url, deck) = start_test_server(10).await;
    let mut waiting = connect(&url).await;
    waiting.send(&join_event(&deck, "Early", None)).await.unwrap();
    let frame = waiting.expect("presentation-not-live", WAIT).await.unwrap();
    assert!(matches!(frame.notice, Notice::PresentationNotLive { .. }));

    // Submitting before the start is refused with a wait hint.
    waiting.send(&pick_on(deck.choice, "A")).await.unwrap();
    assert_eq!(expect_error(&mut waiting).await.1, Recovery::Wait);

    let _presenter = presenter(&url, &deck).await;
    let frame = waiting.expect("presentation-live", WAIT).await.unwrap();
    match frame.notice {
        Notice::PresentationLive { presentation, slide, .. } => {
            assert!(presentation.is_live);
            assert_eq!(slide.map(|s| s.id), Some(deck.choice));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(frame.generation, 1);

    waiting.send(&pick_on(deck.choice, "A")).await.unwrap();
    waiting.expect("response-submitted", WAIT).await.unwrap();
}

#[tokio::test]
async fn test_three_participants_vote_and_room_sees_totals() {
    let (url, deck) = start_test_server(10).await;
    let mut host = presenter(&url, &deck).await;
    let (mut p1, _) = participant(&url, &deck, "P1").await;
    let (mut p2, _) = participant(&url, &deck, "P2").await;
    let (mut p3, _) = participant(&url, &deck, "P3").await;

    for (client, label) in [(&mut p1, "A"), (&mut p2, "A"), (&mut p3, "B")] {
        client.send(&pick_on(deck.choice, label)).await.unwrap();
        let frame = client.expect("response-submitted", WAIT).await.unwrap();
        match frame.notice {
            Notice::ResponseSubmitted(receipt) => {
                assert!(receipt.success);
                assert!(receipt.has_submitted);
                assert_eq!(receipt.submission_count, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    loop {
        let frame = host.expect("response-updated", WAIT).await.unwrap();
        let Notice::ResponseUpdated(results) = frame.notice else {
            unreachable!()
        };
        if results.aggregate_snapshot.total_responses() == 3 {
            assert_eq!(results.aggregate_snapshot.votes_for("A"), 2);
            assert_eq!(results.aggregate_snapshot.votes_for("B"), 1);
            break;
        }
    }
}

#[tokio::test]
async fn test_duplicate_submission_is_rejected() {
    let (url, deck) = start_test_server(10).await;
    let _host = presenter(&url, &deck).await;
    let (mut p, _) = participant(&url, &deck, "P").await;

    p.send(&pick_on(deck.choice, "A")).await.unwrap();
    p.expect("response-submitted", WAIT).await.unwrap();
    p.send(&pick_on(deck.choice, "B")).await.unwrap();
    assert_eq!(
        expect_error(&mut p).await,
        ("duplicate-submission".to_string(), Recovery::AlreadyDone)
    );

    // Answering a slide that is not on screen is refused as well.
    p.send(&pick_on(Uuid::nil(), "A")).await.unwrap();
    assert_eq!(expect_error(&mut p).await.0, "not-found");
}

#[tokio::test]
async fn test_presenter_commands_need_presenter_channel() {
    let (url, deck) = start_test_server(10).await;
    let _host = presenter(&url, &deck).await;
    let (mut p, _) = participant(&url, &deck, "Mallory").await;

    p.send(&ClientEvent::ChangeSlide { index: 1 }).await.unwrap();
    assert_eq!(expect_error(&mut p).await, ("authorization".to_string(), Recovery::NotAllowed));

    let mut impostor = connect(&url).await;
    impostor
        .send(&ClientEvent::StartPresentation {
            access_code: Some(deck.code.clone()),
            presentation_id: None,
            presenter_token: "guess".into(),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(&mut impostor).await.0, "authorization");
    impostor.send(&ClientEvent::EndPresentation).await.unwrap();
    assert_eq!(expect_error(&mut impostor).await.0, "authorization");
}

#[tokio::test]
async fn test_slide_change_resets_and_restores_flags() {
    let (url, deck) = start_test_server(10).await;
    let mut host = presenter(&url, &deck).await;
    let (mut p, _) = participant(&url, &deck, "P").await;

    p.send(&pick_on(deck.choice, "A")).await.unwrap();
    p.expect("response-submitted", WAIT).await.unwrap();

    host.send(&ClientEvent::ChangeSlide { index: 2 }).await.unwrap();
    let frame = p.expect("slide-changed", WAIT).await.unwrap();
    assert_eq!(frame.generation, 2);
    assert!(matches!(frame.notice, Notice::SlideChanged { index: 2, .. }));

    host.send(&ClientEvent::ChangeSlide { index: 0 }).await.unwrap();
    p.expect("slide-changed", WAIT).await.unwrap();
    let frame = p.expect("submission-state", WAIT).await.unwrap();
    match frame.notice {
        Notice::SubmissionState { slide_id, has_submitted, submission_count, .. } => {
            assert_eq!(slide_id, deck.choice);
            assert!(has_submitted);
            assert_eq!(submission_count, 1);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn test_reconnect_restores_submission_state() {
    let (url, deck) = start_test_server(10).await;
    let _host = presenter(&url, &deck).await;
    let (mut p, seat) = participant(&url, &deck, "Flaky").await;
    p.send(&pick_on(deck.choice, "B")).await.unwrap();
    p.expect("response-submitted", WAIT).await.unwrap();
    p.close();

    // The id alone is public; re-attaching needs the token.
    let mut thief = connect(&url).await;
    thief
        .send(&ClientEvent::JoinPresentation {
            access_code: deck.code.clone(),
            participant_id: Some(seat.id),
            resume_token: None,
            participant_name: "Thief".into(),
        })
        .await
        .unwrap();
    assert_eq!(expect_error(&mut thief).await.0, "authorization");

    let mut again = connect(&url).await;
    again.send(&join_event(&deck, "", Some(seat))).await.unwrap();
    let frame = again.expect("joined-presentation", WAIT).await.unwrap();
    let Notice::JoinedPresentation(state) = frame.notice else {
        unreachable!()
    };
    assert_eq!(state.participant_id, seat.id);
    assert_eq!(state.resume_token, seat.token);
    assert!(state.rejoined);
    assert!(state.has_submitted);
    assert_eq!(state.participant_response, Some(Answer::Choice(vec!["B".into()])));
    assert_eq!(state.aggregate_snapshot.map(|s| s.votes_for("B")), Some(1));
}

#[tokio::test]
async fn test_kick_disconnects_and_blocks_rejoin() {
    let (url, deck) = start_test_server(10).await;
    let mut host = presenter(&url, &deck).await;
    let (mut p, seat) = participant(&url, &deck, "Troll").await;
    let pid = seat.id;

    host.send(&ClientEvent::KickParticipant { participant_id: pid }).await.unwrap();
    p.expect("kicked-by-presenter", WAIT).await.unwrap();
    wait_for_roster(&mut host, pid, false).await;
    assert!(matches!(p.recv_timeout(WAIT).await, Err(ProtocolError::ConnectionClosed)));

    let mut back = connect(&url).await;
    back.send(&join_event(&deck, "Troll", Some(seat))).await.unwrap();
    assert_eq!(expect_error(&mut back).await.0, "authorization");

    host.send(&ClientEvent::AdmitParticipant { participant_id: pid }).await.unwrap();
    wait_for_roster(&mut host, pid, true).await;
    let mut admitted = connect(&url).await;
    admitted.send(&join_event(&deck, "Troll", Some(seat))).await.unwrap();
    admitted.expect("joined-presentation", WAIT).await.unwrap();
}

#[tokio::test]
async fn test_capacity_limits_new_participants_only() {
    let (url, deck) = start_test_server(1).await;
    let _host = presenter(&url, &deck).await;
    let (mut first, seat) = participant(&url, &deck, "First").await;

    let mut second = connect(&url).await;
    second.send(&join_event(&deck, "Second", None)).await.unwrap();
    assert_eq!(expect_error(&mut second).await.0, "capacity");

    first.close();
    let mut again = connect(&url).await;
    again.send(&join_event(&deck, "First", Some(seat))).await.unwrap();
    again.expect("joined-presentation", WAIT).await.unwrap();
}

#[tokio::test]
async fn test_quiz_closes_on_server_timer() {
    let (url, deck) = start_test_server(10).await;
    let mut host = presenter(&url, &deck).await;
    let (mut p, _) = participant(&url, &deck, "Quick").await;

    host.send(&ClientEvent::ChangeSlide { index: 1 }).await.unwrap();
    p.expect("slide-changed", WAIT).await.unwrap();
    host.send(&ClientEvent::StartQuiz { slide_id: deck.quiz }).await.unwrap();
    p.expect("quiz-started", WAIT).await.unwrap();

    p.send(&ClientEvent::SubmitQuizAnswer { slide_id: deck.quiz, participant_id: None, answer: 1 })
        .await
        .unwrap();
    let frame = p.expect("quiz-answer-submitted", WAIT).await.unwrap();
    match frame.notice {
        Notice::QuizAnswerSubmitted(receipt) => {
            let verdict = receipt.result.expect("quiz verdict");
            assert!(verdict.is_correct);
            assert!(verdict.points.unwrap_or(0) >= 500);
        }
        other => panic!("unexpected {other:?}"),
    }
    host.expect("quiz-results-updated", WAIT).await.unwrap();

    let frame = p.expect("quiz-ended", WAIT).await.unwrap();
    match frame.notice {
        Notice::QuizEnded { slide_id, correct_option, leaderboard } => {
            assert_eq!(slide_id, deck.quiz);
            assert_eq!(correct_option, 1);
            assert_eq!(leaderboard.len(), 1);
            assert_eq!(leaderboard[0].rank, 1);
        }
        other => panic!("unexpected {other:?}"),
    }

    // Too late now.
    host.send(&ClientEvent::StartQuiz { slide_id: deck.quiz }).await.unwrap();
    assert_eq!(expect_error(&mut host).await.0, "closed");
}

#[tokio::test]
async fn test_qna_flow_and_state_request() {
    let (url, deck) = start_test_server(10).await;
    let mut host = presenter(&url, &deck).await;
    let (mut p, _) = participant(&url, &deck, "Curious").await;

    host.send(&ClientEvent::ChangeSlide { index: 2 }).await.unwrap();
    p.expect("slide-changed", WAIT).await.unwrap();
    p.send(&ClientEvent::SubmitQnaQuestion {
        slide_id: deck.qna,
        participant_id: None,
        question: "Why?".into(),
    })
    .await
    .unwrap();
    p.expect("qna-question-submitted", WAIT).await.unwrap();

    host.send(&ClientEvent::RequestQnaState { slide_id: deck.qna }).await.unwrap();
    let frame = host.expect("qna-updated", WAIT).await.unwrap();
    let Notice::QnaUpdated(results) = frame.notice else {
        unreachable!()
    };
    assert_eq!(results.aggregate_snapshot.total_responses(), 1);

    host.send(&ClientEvent::ClearQnaQuestions { slide_id: deck.qna }).await.unwrap();
    loop {
        let frame = p.expect("qna-updated", WAIT).await.unwrap();
        let Notice::QnaUpdated(results) = frame.notice else {
            unreachable!()
        };
        if results.aggregate_snapshot.total_responses() == 0 {
            break;
        }
    }
    // Clearing gave the quota back.
    p.send(&ClientEvent::SubmitQnaQuestion {
        slide_id: deck.qna,
        participant_id: None,
        question: "Again?".into(),
    })
    .await
    .unwrap();
    p.expect("qna-question-submitted", WAIT).await.unwrap();
}

#[tokio::test]
async fn test_end_presentation_closes_room() {
    let (url, deck) = start_test_server(10).await;
    let mut host = presenter(&url, &deck).await;
    let (mut p, _) = participant(&url, &deck, "Stayer").await;

    host.send(&ClientEvent::EndPresentation).await.unwrap();
    let frame = p.expect("presentation-ended", WAIT).await.unwrap();
    assert!(matches!(frame.notice, Notice::PresentationEnded { .. }));
    assert!(matches!(p.recv_timeout(WAIT).await, Err(ProtocolError::ConnectionClosed)));
    host.expect("presentation-ended", WAIT).await.unwrap();

    // The access code opens a fresh, not yet live session afterwards.
    let mut late = connect(&url).await;
    late.send(&join_event(&deck, "Late", None)).await.unwrap();
    let frame = late.expect("presentation-not-live", WAIT).await.unwrap();
    assert!(matches!(frame.notice, Notice::PresentationNotLive { presentation, .. } if !presentation.is_live));
}
