// Copyright 2023 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

//! Handshake and echo over a TLS listener using a throwaway self-signed
//! certificate generated at test time.

use net::{Listener, Timeout, TlsTcpAcceptor};

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::{X509, X509NameBuilder};

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

fn self_signed_identity() -> (Vec<u8>, Vec<u8>) {
    let rsa = Rsa::generate(2048).unwrap();
    let pkey = PKey::from_rsa(rsa).unwrap();

    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, "localhost").unwrap();
    let name = name.build();

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name).unwrap();
    builder.set_issuer_name(&name).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(7).unwrap())
        .unwrap();
    builder.set_pubkey(&pkey).unwrap();
    builder.sign(&pkey, MessageDigest::sha256()).unwrap();
    let cert = builder.build();

    (
        cert.to_pem().unwrap(),
        pkey.private_key_to_pem_pkcs8().unwrap(),
    )
}

fn write_identity(dir: &PathBuf) -> (PathBuf, PathBuf) {
    let (cert, key) = self_signed_identity();
    std::fs::create_dir_all(dir).unwrap();
    let cert_path = dir.join("test.crt");
    let key_path = dir.join("test.key");
    std::fs::write(&cert_path, cert).unwrap();
    std::fs::write(&key_path, key).unwrap();
    (cert_path, key_path)
}

#[test]
fn tls_handshake_and_echo() {
    let dir = std::env::temp_dir().join(format!("tern-net-tls-{}", std::process::id()));
    let (cert_path, key_path) = write_identity(&dir);

    let acceptor = TlsTcpAcceptor::builder()
        .unwrap()
        .certificate_chain_file(&cert_path)
        .private_key_file(&key_path)
        .build()
        .unwrap();

    let listener = Listener::bind("127.0.0.1", 0, 16, 0)
        .unwrap()
        .with_tls(Arc::new(acceptor));
    let addr = listener.local_addr();

    let client = std::thread::spawn(move || {
        let mut builder = SslConnector::builder(SslMethod::tls()).unwrap();
        builder.set_verify(SslVerifyMode::NONE);
        let connector = builder.build();

        let tcp = std::net::TcpStream::connect(addr).unwrap();
        let mut tls = connector.connect("localhost", tcp).unwrap();

        tls.write_all(b"PING\r\n").unwrap();

        let mut buf = [0u8; 6];
        tls.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"PONG\r\n");
    });

    let mut stream = listener
        .accept(Timeout::Millis(5000), Timeout::Millis(5000))
        .unwrap();
    stream.set_timeout(Timeout::Millis(5000));

    let mut buf = [0u8; 6];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"PING\r\n");

    stream.write_all(b"PONG\r\n").unwrap();

    client.join().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn handshake_timeout_reports_timed_out() {
    let dir = std::env::temp_dir().join(format!("tern-net-tls-stall-{}", std::process::id()));
    let (cert_path, key_path) = write_identity(&dir);

    let acceptor = TlsTcpAcceptor::builder()
        .unwrap()
        .certificate_chain_file(&cert_path)
        .private_key_file(&key_path)
        .build()
        .unwrap();

    let listener = Listener::bind("127.0.0.1", 0, 16, 0)
        .unwrap()
        .with_tls(Arc::new(acceptor));
    let addr = listener.local_addr();

    // connect without ever starting the TLS handshake
    let _client = std::net::TcpStream::connect(addr).unwrap();

    let err = listener
        .accept(Timeout::Millis(5000), Timeout::Millis(200))
        .unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);

    let _ = std::fs::remove_dir_all(&dir);
}
