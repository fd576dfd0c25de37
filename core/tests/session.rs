/*
 * session.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * End-to-end session tests against a scripted server: each test binds a
 * local listener, plays a fixed exchange, and asserts on job results and
 * observable session state.
 */

use postino_core::encoder::CommandArg;
use postino_core::{
    CreateJob, DeleteJob, Error, FetchJob, FetchScope, ImapSet, Job, JobContext, ListJob,
    ListOption, LoginJob, NoopJob, SearchJob, SelectJob, Session, SessionEvent, SessionState,
};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

enum Step {
    Send(&'static str),
    SendBytes(Vec<u8>),
    Expect(&'static str),
    Pause,
}

use Step::{Expect, Pause, Send, SendBytes};

async fn spawn_server(steps: Vec<Step>) -> (u16, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        for step in steps {
            match step {
                Send(text) => {
                    write_half.write_all(text.as_bytes()).await.unwrap();
                    write_half.flush().await.unwrap();
                }
                SendBytes(bytes) => {
                    write_half.write_all(&bytes).await.unwrap();
                    write_half.flush().await.unwrap();
                }
                Expect(expected) => {
                    let mut line = String::new();
                    reader.read_line(&mut line).await.unwrap();
                    assert_eq!(line.trim_end_matches(['\r', '\n']), expected);
                }
                Pause => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        // Hold the socket open so the client side finishes first.
        tokio::time::sleep(Duration::from_millis(200)).await;
    });
    (port, handle)
}

fn login_script() -> Vec<Step> {
    vec![
        Send("* OK IMAP4rev1 ready\r\n"),
        Expect("A000001 CAPABILITY"),
        Send("A000001 OK\r\n"),
        Expect("A000002 LOGIN \"user\" \"password\""),
        Send("A000002 OK User logged in\r\n"),
    ]
}

#[tokio::test]
async fn plain_login_then_delete() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 DELETE \"foo\""),
        Send("A000003 OK DELETE completed\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    let events = session.take_events().unwrap();
    LoginJob::new("user", "password").run(&session).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
    // The final OK of the login replaces the stored greeting.
    assert_eq!(session.server_greeting(), b"User logged in".to_vec());
    assert_eq!(session.user_name(), "user");

    DeleteJob::new("foo").run(&session).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.selected_mailbox(), "");
    drop(events);
    server.await.unwrap();
}

#[tokio::test]
async fn delete_of_a_missing_mailbox_succeeds() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 DELETE \"foo\""),
        Send("A000003 NO Name \"foo-NONEXISTENT\" does not exist [NONEXISTENT]\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    DeleteJob::new("foo").run(&session).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn failed_delete_carries_the_server_text() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 DELETE \"foo\""),
        Send("A000003 NO access denied\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    match DeleteJob::new("foo").run(&session).await {
        Err(Error::CommandFailed { job, text }) => {
            assert_eq!(job, "Delete");
            assert!(text.contains("access denied"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn list_decodes_utf7_mailboxes() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 LIST \"\" *"),
        Send("* LIST (\\HasNoChildren) / INBOX/&AOQ- &APY- &APw- @ &IKw-\r\n"),
        Send("A000003 OK LIST completed\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    let mut list = ListJob::new();
    list.set_option(ListOption::IncludeUnsubscribed);
    let entries = list.run(&session).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0.name, "INBOX/ä ö ü @ €");
    assert_eq!(entries[0].0.separator, '/');
    assert_eq!(entries[0].1, vec!["\\hasnochildren".to_string()]);
    server.await.unwrap();
}

#[tokio::test]
async fn select_binds_the_mailbox() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 SELECT \"inbox\""),
        Send("* FLAGS (\\Answered \\Seen)\r\n"),
        Send("* 17 EXISTS\r\n"),
        Send("* 2 RECENT\r\n"),
        Send("* OK [UIDVALIDITY 3857529045] UIDs valid\r\n"),
        Send("* OK [UIDNEXT 4392] Predicted next UID\r\n"),
        Send("A000003 OK [READ-WRITE] SELECT completed\r\n"),
        Expect("A000004 CLOSE"),
        Send("A000004 OK CLOSE completed\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    let result = SelectJob::new("inbox").run(&session).await.unwrap();
    assert_eq!(session.state(), SessionState::Selected);
    assert_eq!(session.selected_mailbox(), "INBOX");
    assert_eq!(result.message_count, 17);
    assert_eq!(result.recent_count, 2);
    assert_eq!(result.uid_validity, 3857529045);
    assert_eq!(result.next_uid, 4392);
    assert!(!result.read_only);

    postino_core::CloseJob::new().run(&session).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);
    assert_eq!(session.selected_mailbox(), "");
    server.await.unwrap();
}

#[tokio::test]
async fn fragmented_fetch_with_literal_mid_stream() {
    let header = vec![b'h'; 246];
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 FETCH 1 (RFC822.SIZE FLAGS UID BODY.PEEK[HEADER])"),
        Send("* 1 FETCH (UID 230 RFC822.SIZE 246 FLAGS (\\Seen) BODY[HEADER] {246}\r\n"),
        Pause,
        SendBytes(header[..100].to_vec()),
        Pause,
        SendBytes(header[100..].to_vec()),
        Pause,
        Send(")\r\n"),
        Send("A000003 OK FETCH completed\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    let mut fetch = FetchJob::new(ImapSet::from_iter([1u64]));
    fetch.set_scope(FetchScope::Headers);
    let results = fetch.run(&session).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].sequence_number, 1);
    assert_eq!(results[0].uid, Some(230));
    assert_eq!(results[0].size, Some(246));
    assert_eq!(results[0].flags, vec!["\\Seen".to_string()]);
    assert_eq!(
        results[0].parts,
        vec![("BODY[HEADER]".to_string(), header)]
    );
    server.await.unwrap();
}

#[tokio::test]
async fn literal_larger_than_the_working_buffer() {
    let body = vec![b'c'; 32000];
    let mut steps = login_script();
    steps.push(Expect("A000003 UID FETCH 1 (UID BODY.PEEK[])"));
    steps.push(Send("* 1 FETCH (UID 1 BODY[] {32000}\r\n"));
    for chunk in body.chunks(8192) {
        steps.push(SendBytes(chunk.to_vec()));
        steps.push(Pause);
    }
    steps.push(Send(")\r\n"));
    steps.push(Send("A000003 OK FETCH completed\r\n"));
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    let mut fetch = FetchJob::new(ImapSet::from_iter([1u64]));
    fetch.set_uid_based(true);
    fetch.set_scope(FetchScope::Content);
    let results = fetch.run(&session).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].parts.len(), 1);
    assert_eq!(results[0].parts[0].0, "BODY[]");
    assert_eq!(results[0].parts[0].1, body);
    server.await.unwrap();
}

#[tokio::test]
async fn jobs_run_in_submission_order() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 CREATE \"alpha\""),
        Send("A000003 OK created\r\n"),
        Expect("A000004 CREATE \"beta\""),
        Send("A000004 OK created\r\n"),
        Expect("A000005 NOOP"),
        Send("A000005 OK nothing happened\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    let (a, b, c) = tokio::join!(
        CreateJob::new("alpha").run(&session),
        CreateJob::new("beta").run(&session),
        NoopJob::new().run(&session),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();
    server.await.unwrap();
}

struct LiteralCreate {
    tags: Vec<String>,
    reply: Option<oneshot::Sender<Result<(), Error>>>,
}

impl Job for LiteralCreate {
    fn name(&self) -> &'static str {
        "LiteralCreate"
    }

    fn start(&mut self, ctx: &mut JobContext<'_>) {
        let tag = ctx.send_command_args("CREATE", &[CommandArg::Literal(b"odd\r\nbox".to_vec())]);
        self.tags.push(tag);
    }

    fn handle_response(&mut self, response: &postino_core::Message, ctx: &mut JobContext<'_>) {
        if let postino_core::ReplyOutcome::Finished(result) =
            postino_core::handle_error_replies(self.name(), &mut self.tags, response)
        {
            if let Some(tx) = self.reply.take() {
                let _ = tx.send(result);
            }
            ctx.complete();
        }
    }

    fn connection_lost(&mut self, error: Error) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(Err(error));
        }
    }
}

#[tokio::test]
async fn literal_arguments_wait_for_the_continuation() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 CREATE {8}"),
        Pause,
        Send("+ Ready for literal data\r\n"),
        Expect("odd"),
        Expect("box"),
        Send("A000003 OK created\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    let (tx, rx) = oneshot::channel();
    session.submit(Box::new(LiteralCreate {
        tags: Vec::new(),
        reply: Some(tx),
    }));
    rx.await.unwrap().unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn search_returns_uids() {
    let mut steps = login_script();
    steps.extend([
        Expect("A000003 UID SEARCH ALL"),
        Send("* SEARCH 2 84 882\r\n"),
        Send("A000003 OK SEARCH completed\r\n"),
    ]);
    let (port, server) = spawn_server(steps).await;

    let session = Session::new("127.0.0.1", port);
    LoginJob::new("user", "password").run(&session).await.unwrap();
    let mut search = SearchJob::new("ALL");
    search.set_uid_based(true);
    assert_eq!(search.run(&session).await.unwrap(), vec![2, 84, 882]);
    server.await.unwrap();
}

#[tokio::test]
async fn bye_greeting_is_fatal() {
    let (port, server) = spawn_server(vec![Send("* BYE go away\r\n")]).await;

    let session = Session::new("127.0.0.1", port);
    let mut events = session.take_events().unwrap();
    let result = LoginJob::new("user", "password").run(&session).await;
    assert!(matches!(result, Err(Error::CouldNotConnect(_))));
    assert_eq!(session.state(), SessionState::Disconnected);

    let mut saw_connection_failed = false;
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::ConnectionFailed {
            saw_connection_failed = true;
        }
    }
    assert!(saw_connection_failed);
    server.await.unwrap();
}

#[tokio::test]
async fn hostile_greeting_closes_the_session() {
    let (port, server) = spawn_server(vec![Send("* KAPOW nothing good\r\n")]).await;

    let session = Session::new("127.0.0.1", port);
    let result = LoginJob::new("user", "password").run(&session).await;
    assert!(matches!(result, Err(Error::CouldNotConnect(_))));
    assert_eq!(session.state(), SessionState::Disconnected);
    server.await.unwrap();
}

#[tokio::test]
async fn connect_refusal_fails_the_first_job() {
    // Bind then drop to get a port nobody is listening on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let session = Session::new("127.0.0.1", port);
    let result = LoginJob::new("user", "password").run(&session).await;
    assert!(matches!(result, Err(Error::CouldNotConnect(_))));
}

#[tokio::test]
async fn idle_watchdog_aborts_a_silent_server() {
    // A server that accepts and then never speaks.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let session = Session::new("127.0.0.1", port);
    session.set_timeout(0);
    let result = NoopJob::new().run(&session).await;
    assert!(matches!(result, Err(Error::Timeout(0))));
    assert_eq!(session.state(), SessionState::Disconnected);
    server.abort();
}

#[tokio::test]
async fn queue_and_state_events_are_published() {
    let (port, server) = spawn_server(login_script()).await;

    let session = Session::new("127.0.0.1", port);
    let mut events = session.take_events().unwrap();
    LoginJob::new("user", "password").run(&session).await.unwrap();

    let mut states = Vec::new();
    let mut queue_sizes = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::StateChanged { new, .. } => states.push(new),
            SessionEvent::JobQueueSizeChanged(n) => queue_sizes.push(n),
            _ => {}
        }
    }
    assert_eq!(
        states,
        vec![
            SessionState::NotAuthenticated,
            SessionState::Authenticated
        ]
    );
    assert_eq!(queue_sizes, vec![1, 0]);
    server.await.unwrap();
}
