use pretty_assertions::assert_eq;
use relaymail_smtp::{AuthMechanism, Capabilities, ClientError, SmtpClient};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

/// Serves one connection: sends `greeting`, then answers each line it reads
/// with the next scripted reply. DATA content is collected until the
/// terminating dot and answered with the reply following the 354.
///
/// Returns every line the client sent, CRLF stripped.
async fn scripted(greeting: &str, replies: &[&str]) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let greeting = greeting.to_string();
    let replies: Vec<String> = replies.iter().map(|r| (*r).to_string()).collect();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut seen = Vec::new();

        write.write_all(greeting.as_bytes()).await.unwrap();

        let mut in_data = false;
        let mut replies = replies.into_iter();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let line = line.trim_end_matches("\r\n").to_string();
            let terminator = line == ".";
            seen.push(line);

            if in_data && !terminator {
                continue;
            }

            let Some(reply) = replies.next() else {
                break;
            };
            in_data = reply.starts_with("354");
            write.write_all(reply.as_bytes()).await.unwrap();
        }

        seen
    });

    (addr, handle)
}

#[tokio::test]
async fn test_ehlo_capabilities() {
    let (addr, server) = scripted(
        "220 mx.test ESMTP\r\n",
        &["250-mx.test\r\n250-SIZE 1000\r\n250-STARTTLS\r\n250 AUTH LOGIN PLAIN\r\n"],
    )
    .await;

    let mut client = SmtpClient::connect(&addr, "mx.test".into()).await.unwrap();
    assert_eq!(client.read_greeting().await.unwrap().code, 220);

    let response = client.ehlo("client.test").await.unwrap();
    let capabilities = Capabilities::from_ehlo(&response);

    assert!(capabilities.supports("starttls"));
    assert_eq!(capabilities.params("SIZE"), Some(&["1000".to_string()][..]));
    assert_eq!(capabilities.auth_mechanism(), Some(AuthMechanism::Plain));

    drop(client);
    assert_eq!(server.await.unwrap(), vec!["EHLO client.test"]);
}

#[tokio::test]
async fn test_auth_login_exchange() {
    let (addr, server) = scripted(
        "220 mx.test\r\n",
        &[
            "334 VXNlcm5hbWU6\r\n",
            "334 UGFzc3dvcmQ6\r\n",
            "235 Authenticated\r\n",
        ],
    )
    .await;

    let mut client = SmtpClient::connect(&addr, "mx.test".into()).await.unwrap();
    client.read_greeting().await.unwrap();
    let response = client
        .auth(AuthMechanism::Login, "user", "secret")
        .await
        .unwrap();
    assert_eq!(response.code, 235);

    drop(client);
    assert_eq!(
        server.await.unwrap(),
        vec!["AUTH LOGIN", "dXNlcg==", "c2VjcmV0"]
    );
}

#[tokio::test]
async fn test_rejected_credentials() {
    let (addr, _server) = scripted("220 mx.test\r\n", &["535 5.7.8 Bad credentials\r\n"]).await;

    let mut client = SmtpClient::connect(&addr, "mx.test".into()).await.unwrap();
    client.read_greeting().await.unwrap();
    let error = client
        .auth(AuthMechanism::Plain, "user", "wrong")
        .await
        .unwrap_err();

    assert!(matches!(error, ClientError::SmtpError { code: 535, .. }));
}

#[tokio::test]
async fn test_transaction_dot_stuffs_content() {
    let (addr, server) = scripted(
        "220 mx.test\r\n",
        &[
            "250 OK\r\n",
            "250 OK\r\n",
            "354 Go ahead\r\n",
            "250 Queued\r\n",
            "221 Bye\r\n",
        ],
    )
    .await;

    let mut client = SmtpClient::connect(&addr, "mx.test".into()).await.unwrap();
    client.read_greeting().await.unwrap();
    assert!(client.mail_from("a@test").await.unwrap().is_success());
    assert!(client.rcpt_to("b@test").await.unwrap().is_success());
    assert_eq!(client.data().await.unwrap().code, 354);
    assert_eq!(
        client.send_data("Subject: x\n\n.hidden\n").await.unwrap().code,
        250
    );
    assert_eq!(client.quit().await.unwrap().code, 221);
    assert!(!client.is_open());

    assert_eq!(
        server.await.unwrap(),
        vec![
            "MAIL FROM:<a@test>",
            "RCPT TO:<b@test>",
            "DATA",
            "Subject: x",
            "",
            "..hidden",
            ".",
            "QUIT",
        ]
    );
}

#[tokio::test]
async fn test_service_closing_drops_connection() {
    let (addr, _server) = scripted("220 mx.test\r\n", &["421 4.3.2 Shutting down\r\n"]).await;

    let mut client = SmtpClient::connect(&addr, "mx.test".into()).await.unwrap();
    client.read_greeting().await.unwrap();

    let response = client.mail_from("a@test").await.unwrap();
    assert_eq!(response.code, 421);
    assert!(!client.is_open());

    let error = client.rset().await.unwrap_err();
    assert!(matches!(error, ClientError::ConnectionClosed));
}

#[tokio::test]
async fn test_closed_socket_is_a_disconnect() {
    let (addr, _server) = scripted("220 mx.test\r\n", &[]).await;

    let mut client = SmtpClient::connect(&addr, "mx.test".into()).await.unwrap();
    client.read_greeting().await.unwrap();

    let error = client.command("NOOP").await.unwrap_err();
    assert!(error.is_disconnect(), "unexpected error: {error:?}");
}
