#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use blaze_common::{
    Address, GatewayError,
    traits::relay::{MessageRelay, Outgoing},
};
use blaze_delivery::{Relay, RelayConfig, RelayProfile};
use pretty_assertions::assert_eq;
use support::mock_server::{MockSmtpServer, SmtpCommand};

fn relay_for(port: u16, command_timeout_secs: u64) -> Relay {
    let config = RelayConfig {
        host: "127.0.0.1".to_string(),
        port,
        destination: String::new(),
        default: RelayProfile {
            username: "relay@upstream.test".to_string(),
            password: "default-secret".to_string(),
        },
        verified: RelayProfile {
            username: "verified@upstream.test".to_string(),
            password: "verified-secret".to_string(),
        },
        hello_name: "gateway.test".to_string(),
        command_timeout_secs,
        accept_invalid_certs: false,
    };

    Relay::new(config, true)
}

fn addresses() -> (Address, Address) {
    (
        Address::parse("alice@sender.test").unwrap(),
        Address::parse("bob@one.test").unwrap(),
    )
}

fn auth_identity(command: &SmtpCommand) -> String {
    let SmtpCommand::Auth(argument) = command else {
        panic!("expected AUTH, got {command:?}");
    };
    let encoded = argument.strip_prefix("PLAIN ").unwrap();
    String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
}

#[tokio::test]
async fn relays_one_message_per_connection() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let relay = relay_for(server.addr().port(), 5);
    let (from, to) = addresses();

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: "Status",
        body: "All good\n.hidden line\n",
    };
    relay.send(&message, false, "127.0.0.1").await.unwrap();

    let commands = server.commands().await;
    assert_eq!(commands[0], SmtpCommand::Ehlo("gateway.test".to_string()));
    assert_eq!(auth_identity(&commands[1]), "\0relay@upstream.test\0default-secret");
    assert_eq!(commands[2], SmtpCommand::MailFrom("FROM:<alice@sender.test>".to_string()));
    assert_eq!(commands[3], SmtpCommand::RcptTo("TO:<bob@one.test>".to_string()));
    assert_eq!(commands[4], SmtpCommand::Data);
    assert_eq!(commands[6], SmtpCommand::Quit);

    let SmtpCommand::MessageContent(content) = &commands[5] else {
        panic!("expected message content, got {:?}", commands[5]);
    };
    assert!(content.contains("Subject: Status\r\n"));
    assert!(content.contains("Content-Type: text/plain; charset=\"UTF-8\"\r\n"));
    assert!(content.ends_with("\r\nAll good\r\n..hidden line\r\n"));
}

#[tokio::test]
async fn verified_sender_uses_its_own_identity() {
    let server = MockSmtpServer::builder().build().await.unwrap();
    let relay = relay_for(server.addr().port(), 5);
    let (from, to) = addresses();

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: "Hello",
        body: "Hi",
    };
    relay
        .send_with_verified_sender(&message, "replies@sender.test")
        .await
        .unwrap();

    let commands = server.commands().await;
    assert_eq!(auth_identity(&commands[1]), "\0verified@upstream.test\0verified-secret");

    let SmtpCommand::MessageContent(content) = &commands[5] else {
        panic!("expected message content, got {:?}", commands[5]);
    };
    assert!(content.contains("Reply-To: replies@sender.test\r\n"));
}

#[tokio::test]
async fn rejected_credentials_stop_before_mail() {
    let server = MockSmtpServer::builder()
        .with_auth_response(535, "5.7.8 Bad credentials")
        .build()
        .await
        .unwrap();
    let relay = relay_for(server.addr().port(), 5);
    let (from, to) = addresses();

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: "Hello",
        body: "Hi",
    };
    let err = relay.send(&message, false, "127.0.0.1").await.unwrap_err();

    assert!(matches!(err, GatewayError::Authentication(_)), "{err}");
    assert!(
        !server
            .commands()
            .await
            .iter()
            .any(|c| matches!(c, SmtpCommand::MailFrom(_)))
    );
}

#[tokio::test]
async fn rejected_recipient_is_a_protocol_error() {
    let server = MockSmtpServer::builder()
        .with_rcpt_to_response(550, "5.1.1 User unknown")
        .build()
        .await
        .unwrap();
    let relay = relay_for(server.addr().port(), 5);
    let (from, to) = addresses();

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: "Hello",
        body: "Hi",
    };
    let err = relay.send(&message, true, "127.0.0.1").await.unwrap_err();

    assert!(matches!(err, GatewayError::Protocol(_)), "{err}");
    assert!(err.to_string().contains("550"));
    assert!(!server.commands().await.contains(&SmtpCommand::Data));
}

#[tokio::test]
async fn unreachable_upstream_is_a_network_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let relay = relay_for(port, 5);
    let (from, to) = addresses();

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: "Hello",
        body: "Hi",
    };
    let err = relay.send(&message, false, "127.0.0.1").await.unwrap_err();

    assert!(err.is_network(), "{err}");
}

#[tokio::test]
async fn slow_upstream_times_out() {
    let server = MockSmtpServer::builder()
        .with_response_delay(Duration::from_secs(3))
        .build()
        .await
        .unwrap();
    let relay = relay_for(server.addr().port(), 1);
    let (from, to) = addresses();

    let message = Outgoing {
        from: &from,
        to: &to,
        subject: "Hello",
        body: "Hi",
    };
    let err = relay.send(&message, false, "127.0.0.1").await.unwrap_err();

    assert!(err.is_network(), "{err}");
    assert!(err.to_string().contains("timed out"));
}
