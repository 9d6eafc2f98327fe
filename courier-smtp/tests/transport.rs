#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::time::Duration;

use base64::prelude::*;
use courier_common::TransportKind;
use courier_dkim::{DkimConfig, generate_keys, verify};
use courier_smtp::{
    ApiConfig, ApiTransport, Attachment, OutgoingMessage, SmtpConfig, SmtpTransport, TlsMode,
    Transport, TransportConfig, TransportConfigError, TransportError, client::ClientError,
};
use pretty_assertions::assert_eq;
use support::{
    mock_api::MockApi,
    mock_server::{MockSmtpServer, SmtpCommand},
};

fn relay(server: &MockSmtpServer) -> SmtpConfig {
    let mut config = SmtpConfig::new("127.0.0.1", server.addr().port());
    config.from = Some("Courier <noreply@example.com>".to_string());
    config
}

fn hello() -> OutgoingMessage {
    OutgoingMessage::new("a@example.com")
        .with_subject("Hi")
        .with_text("Hello")
}

/// Split a received DATA payload into headers and body, keeping folded
/// values as they arrived.
fn parse(raw: &str) -> (Vec<(String, String)>, String) {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap();
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in head.split("\r\n") {
        if line.starts_with([' ', '\t']) {
            let (_, value) = headers.last_mut().unwrap();
            value.push_str("\r\n");
            value.push_str(line);
        } else {
            let (name, value) = line.split_once(": ").unwrap();
            headers.push((name.to_string(), value.to_string()));
        }
    }
    (headers, body.to_string())
}

#[tokio::test]
async fn test_smtp_delivers_through_relay() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(relay(&server), None).unwrap();
    assert_eq!(transport.kind(), TransportKind::Smtp);

    let receipt = transport.send(&hello()).await.unwrap();
    assert_eq!(receipt.detail, "OK: queued as 4F2A");
    assert!(receipt.message_id.ends_with("@example.com>"));

    let commands = server.commands().await;
    assert_eq!(commands[0], SmtpCommand::Ehlo("localhost".to_string()));
    assert_eq!(
        commands[1],
        SmtpCommand::MailFrom("FROM:<noreply@example.com>".to_string())
    );
    assert_eq!(commands[2], SmtpCommand::RcptTo("TO:<a@example.com>".to_string()));
    assert_eq!(commands[3], SmtpCommand::Data);
    assert_eq!(commands.last(), Some(&SmtpCommand::Quit));

    let messages = server.messages().await;
    assert_eq!(messages.len(), 1);
    let (headers, body) = parse(&messages[0]);
    assert!(headers.iter().any(|(n, v)| n == "Subject" && v == "Hi"));
    assert!(headers.iter().any(|(n, v)| n == "Message-ID" && *v == receipt.message_id));
    assert!(!headers.iter().any(|(n, _)| n == "DKIM-Signature"));
    assert_eq!(body, "Hello\r\n");
}

#[tokio::test]
async fn test_smtp_sends_every_recipient_and_attachments() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(relay(&server), None).unwrap();

    let message = OutgoingMessage::for_recipients("a@example.com, B <b@example.com>")
        .with_subject("Report")
        .with_text(".hidden line\r\nvisible")
        .with_attachment(Attachment::new("report.csv", "text/csv", "a,b\n1,2\n"));
    transport.send(&message).await.unwrap();

    let recipients: Vec<SmtpCommand> = server
        .commands()
        .await
        .into_iter()
        .filter(|c| matches!(c, SmtpCommand::RcptTo(_)))
        .collect();
    assert_eq!(
        recipients,
        vec![
            SmtpCommand::RcptTo("TO:<a@example.com>".to_string()),
            SmtpCommand::RcptTo("TO:<b@example.com>".to_string()),
        ]
    );

    let raw = &server.messages().await[0];
    assert!(raw.contains("Content-Type: multipart/mixed"));
    assert!(raw.contains("filename=\"report.csv\""));
    assert!(raw.contains(&BASE64_STANDARD.encode("a,b\n1,2\n")));
    assert!(raw.contains("\r\n..hidden line\r\n"));
}

#[tokio::test]
async fn test_smtp_authenticates_with_plain() {
    let server = MockSmtpServer::builder()
        .with_ehlo_response(
            250,
            vec!["localhost".to_string(), "AUTH PLAIN LOGIN".to_string()],
        )
        .build()
        .await
        .unwrap();
    let mut config = relay(&server);
    config.username = Some("courier".to_string());
    config.password = Some("secret".to_string());

    SmtpTransport::new(config, None)
        .unwrap()
        .send(&hello())
        .await
        .unwrap();

    assert!(
        server
            .commands()
            .await
            .contains(&SmtpCommand::Auth("PLAIN AGNvdXJpZXIAc2VjcmV0".to_string()))
    );
}

#[tokio::test]
async fn test_smtp_rejected_credentials_fail_the_send() {
    let server = MockSmtpServer::builder()
        .with_auth_response(535, "Authentication credentials invalid")
        .build()
        .await
        .unwrap();
    let mut config = relay(&server);
    config.username = Some("courier".to_string());
    config.password = Some("wrong".to_string());

    let err = SmtpTransport::new(config, None)
        .unwrap()
        .send(&hello())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Rejected {
            stage: "AUTH",
            code: 535,
            ..
        }
    ));
    assert!(server.messages().await.is_empty());
}

#[tokio::test]
async fn test_smtp_rejection_is_reported_and_session_closed() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "User unknown")
        .build()
        .await
        .unwrap();
    let transport = SmtpTransport::new(relay(&server), None).unwrap();

    let err = transport.send(&hello()).await.unwrap_err();
    match err {
        TransportError::Rejected {
            stage,
            code,
            message,
        } => {
            assert_eq!(stage, "RCPT TO");
            assert_eq!(code, 550);
            assert_eq!(message, "User unknown");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(server.commands().await.last(), Some(&SmtpCommand::Quit));
}

#[tokio::test]
async fn test_smtp_required_tls_refuses_plaintext_relay() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let mut config = relay(&server);
    config.tls = TlsMode::Required;

    let err = SmtpTransport::new(config, None)
        .unwrap()
        .send(&hello())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::TlsUnavailable(_)));
    assert!(
        !server
            .commands()
            .await
            .iter()
            .any(|c| matches!(c, SmtpCommand::MailFrom(_)))
    );
}

#[tokio::test]
async fn test_smtp_stage_timeout() {
    let server = MockSmtpServer::builder()
        .with_response_delay(Duration::from_secs(3))
        .build()
        .await
        .unwrap();
    let mut config = relay(&server);
    config.timeout_secs = 1;

    let err = SmtpTransport::new(config, None)
        .unwrap()
        .send(&hello())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Timeout { stage: "EHLO" }));
}

#[tokio::test]
async fn test_smtp_connection_refused() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let mut config = SmtpConfig::new("127.0.0.1", port);
    config.from = Some("noreply@example.com".to_string());

    let err = SmtpTransport::new(config, None)
        .unwrap()
        .send(&hello())
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Client(ClientError::Io(_))));
}

#[tokio::test]
async fn test_line_breaks_never_reach_the_relay() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let transport = SmtpTransport::new(relay(&server), None).unwrap();

    let smuggled = [
        OutgoingMessage::new("a@example.com\r\nRCPT TO:<victim@example.net>"),
        hello().with_subject("Hi\r\nBcc: victim@example.net"),
        hello().with_from("noreply@example.com>\r\nRSET"),
    ];
    for message in smuggled {
        let err = transport.send(&message).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidMessage(_)), "{err}");
    }
    assert!(server.commands().await.is_empty());
}

#[tokio::test]
async fn test_smtp_signs_with_dkim() {
    let keys = generate_keys(1024).unwrap();
    let dkim = DkimConfig::new(keys.private_key.clone(), "mail", "example.com");

    let server = MockSmtpServer::builder().build().await.unwrap();
    SmtpTransport::new(relay(&server), Some(&dkim))
        .unwrap()
        .send(&hello())
        .await
        .unwrap();

    let (headers, body) = parse(&server.messages().await[0]);
    let (name, value) = &headers[0];
    assert_eq!(name, "DKIM-Signature");
    assert!(value.contains("d=example.com;"));
    assert!(verify(&keys.public_key, &headers, &body, &format!("{name}: {value}")).unwrap());
}

#[tokio::test]
async fn test_api_posts_signed_raw_message() {
    let keys = generate_keys(1024).unwrap();
    let dkim = DkimConfig::new(keys.private_key.clone(), "mail", "example.com");
    let api = MockApi::start(202, r#"{"id":"prov-123"}"#).await.unwrap();

    let mut config = ApiConfig::new(api.url("/v1/send"), "sk_test_key");
    config.from = Some("Courier <noreply@example.com>".to_string());
    let transport = ApiTransport::new(config, Some(&dkim)).unwrap();
    assert_eq!(transport.kind(), TransportKind::Api);

    let receipt = transport.send(&hello()).await.unwrap();
    assert_eq!(receipt.detail, "prov-123");

    let requests = api.requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/v1/send");
    assert_eq!(request.header("authorization"), Some("Bearer sk_test_key"));

    let json = request.json();
    assert_eq!(json["from"], "noreply@example.com");
    assert_eq!(json["to"][0], "a@example.com");
    assert_eq!(json["subject"], "Hi");
    assert_eq!(json["messageId"], receipt.message_id.as_str());

    let raw = String::from_utf8(
        BASE64_STANDARD
            .decode(json["raw"].as_str().unwrap())
            .unwrap(),
    )
    .unwrap();
    let (headers, body) = parse(&raw);
    let (name, value) = &headers[0];
    assert_eq!(name, "DKIM-Signature");
    assert!(verify(&keys.public_key, &headers, &body, &format!("{name}: {value}")).unwrap());
}

#[tokio::test]
async fn test_api_error_status_is_transport_error() {
    let api = MockApi::start(503, r#"{"error":"unavailable"}"#).await.unwrap();
    let mut config = ApiConfig::new(api.url("/send"), "key");
    config.from = Some("noreply@example.com".to_string());

    let err = ApiTransport::new(config, None)
        .unwrap()
        .send(&hello())
        .await
        .unwrap_err();
    match err {
        TransportError::Provider { status, body } => {
            assert_eq!(status, 503);
            assert!(body.contains("unavailable"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_transport_config_from_ron() {
    let config: TransportConfig = ron::from_str(r#"Smtp((host: "relay.example.com"))"#).unwrap();
    assert_eq!(config.kind(), TransportKind::Smtp);
    let TransportConfig::Smtp(smtp) = &config else {
        panic!("expected an SMTP config");
    };
    assert_eq!(smtp.port, 587);
    assert_eq!(smtp.tls, TlsMode::Opportunistic);
    assert_eq!(smtp.timeout_secs, 30);
    assert!(config.into_transport(None).is_ok());

    let config: TransportConfig =
        ron::from_str(r#"Api((endpoint: "https://api.example.com/send", api_key: ""))"#).unwrap();
    assert!(matches!(
        config.into_transport(None),
        Err(TransportConfigError::MissingField("api_key"))
    ));
}
