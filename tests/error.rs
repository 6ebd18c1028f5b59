use ssp::error::{DialError, PeekError, ProxyError, RegistryError};
use std::error::Error;
use std::io;
use std::time::Duration;

#[test]
fn test_peek_error_display() {
    assert_eq!(
        PeekError::TooLarge { limit: 1024 }.to_string(),
        "ClientHello exceeds 1024 bytes"
    );
    assert!(PeekError::UnexpectedMessage(2).to_string().contains('2'));
    assert!(PeekError::Malformed("truncated random")
        .to_string()
        .contains("truncated random"));
}

#[test]
fn test_io_errors_convert() {
    let peek: PeekError = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
    assert!(matches!(peek, PeekError::Io(_)));

    let proxy: ProxyError = PeekError::NotTls.into();
    assert!(matches!(proxy, ProxyError::Peek(PeekError::NotTls)));

    let dial: DialError = io::Error::other("boom").into();
    assert!(matches!(dial, DialError::Io(_)));
}

#[test]
fn test_dial_error_keeps_source() {
    let err = ProxyError::Dial {
        target: "example.internal:443".to_string(),
        source: DialError::Connect {
            addr: "example.internal:443".to_string(),
            source: io::ErrorKind::ConnectionRefused.into(),
        },
    };
    assert!(err.to_string().starts_with("dial example.internal:443 error"));
    let source = err.source().unwrap();
    assert!(source.to_string().contains("failed to connect"));
    assert!(source.source().is_some());
}

#[test]
fn test_misc_display() {
    assert!(ProxyError::PeekTimeout(Duration::from_secs(5))
        .to_string()
        .contains("5s"));
    assert_eq!(
        ProxyError::NoServerName.to_string(),
        "ClientHello has no server name"
    );
    assert_eq!(
        DialError::AuthRejected {
            proxy: "p:1080".to_string()
        }
        .to_string(),
        "proxy p:1080 rejected authentication"
    );
    assert_eq!(
        RegistryError::Frozen {
            scheme: "x".to_string()
        }
        .to_string(),
        "cannot register scheme x: registry is frozen"
    );
}
