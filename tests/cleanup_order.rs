mod common;

use std::io::Cursor;

use common::{login, login_events, teardown_events, Event, MockToken, RecordingSink, RecordingSource, Step, PIN};
use sefile::channel::FileHandle;
use sefile::cli::{Command, Connect};
use sefile::config::Config;
use sefile::device::{self, Device};
use sefile::error::{Error, Failure};
use sefile::session::{self, Attempts};
use sefile::stream::{self, StreamBuffer};
use sefile::token::{Creation, Fault, Mode};
use zeroize::Zeroizing;

fn encrypt(token: &MockToken, data: &[u8]) -> Result<(), Error> {
    let mut buffer = StreamBuffer::with_capacity(4).unwrap();
    let session = login(token, "dev0")?;
    let mut handle = FileHandle::open(&session, "cipher", Mode::Write, Creation::CreateNew)?;
    let source = RecordingSource::new(data, token.log());
    stream::write_from_source(&mut handle, source, data.len() as u64, &mut buffer)?;
    handle.close()?;
    session.close();
    Ok(())
}

fn decrypt(token: &MockToken) -> Result<Vec<u8>, Error> {
    let mut buffer = StreamBuffer::with_capacity(4).unwrap();
    let session = login(token, "dev0")?;
    let mut handle = FileHandle::open(&session, "cipher", Mode::Read, Creation::OpenExisting)?;
    let sink = RecordingSink::new(token.log());
    let data = sink.data.clone();
    stream::read_to_sink(&mut handle, sink, &mut buffer)?;
    handle.close()?;
    session.close();
    let out = data.borrow().clone();
    Ok(out)
}

fn seq(parts: &[&[Event]]) -> Vec<Event> {
    parts.iter().flat_map(|p| p.iter().cloned()).collect()
}

#[test]
fn device_open_failure_releases_nothing() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::Open, Fault::Code(0x11));
    let err = encrypt(&token, b"data").unwrap_err();
    assert!(matches!(err, Error::DeviceOpenFailed(0x11)));
    assert_eq!(token.events(), [Event::Open("dev0".into())]);
}

#[test]
fn login_failure_closes_device_only() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::Login, Fault::Code(0x22));
    let err = encrypt(&token, b"data").unwrap_err();
    assert!(matches!(err, Error::LoginFailed(0x22)));
    assert_eq!(
        token.events(),
        [Event::Open("dev0".into()), Event::Login, Event::CloseDevice]
    );
}

#[test]
fn clock_sync_failure_tears_down_session() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::SetTime, Fault::Code(0x33));
    let err = encrypt(&token, b"data").unwrap_err();
    assert!(matches!(err, Error::ClockSyncFailed(0x33)));
    assert_eq!(
        token.events(),
        seq(&[
            &[Event::Open("dev0".into()), Event::Login, Event::SetTime],
            &teardown_events()
        ])
    );
}

#[test]
fn subsystem_failure_tears_down_session() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::SecureInit, Fault::Code(0x44));
    let err = encrypt(&token, b"data").unwrap_err();
    assert!(matches!(err, Error::SubsystemInitFailed(0x44)));
    assert_eq!(token.events(), seq(&[&login_events("dev0"), &teardown_events()]));
}

#[test]
fn file_open_failure_releases_session_and_device() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::OpenFile, Fault::Code(0x55));
    let err = encrypt(&token, b"data").unwrap_err();
    assert!(matches!(err, Error::FileOpenFailed(Failure::Code(0x55))));
    assert_eq!(
        token.events(),
        seq(&[
            &login_events("dev0"),
            &[Event::OpenFile("cipher".into())],
            &teardown_events()
        ])
    );
}

#[test]
fn write_failure_closes_source_then_aborts_handle() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::Write, Fault::Code(0x66));
    let err = encrypt(&token, b"data").unwrap_err();
    assert!(matches!(err, Error::WriteFailed(Failure::Code(0x66))));
    assert_eq!(
        token.events(),
        seq(&[
            &login_events("dev0"),
            &[
                Event::OpenFile("cipher".into()),
                Event::Write(4),
                Event::LocalClosed,
                Event::AbortFile
            ],
            &teardown_events()
        ])
    );
}

#[test]
fn read_failure_closes_sink_then_aborts_handle() {
    let token = MockToken::new(&["dev0"]);
    token.put_file("cipher", b"abcdef");
    token.fail(Step::Read, Fault::SignatureMismatch);
    let err = decrypt(&token).unwrap_err();
    assert!(err.is_signature_mismatch());
    assert!(matches!(err, Error::ReadFailed(Failure::SignatureMismatch)));
    assert_eq!(
        token.events(),
        seq(&[
            &login_events("dev0"),
            &[
                Event::OpenFile("cipher".into()),
                Event::Read(0),
                Event::LocalClosed,
                Event::AbortFile
            ],
            &teardown_events()
        ])
    );
}

#[test]
fn short_source_is_a_local_error() {
    let token = MockToken::new(&["dev0"]);
    let mut buffer = StreamBuffer::with_capacity(4).unwrap();
    let session = login(&token, "dev0").unwrap();
    let mut handle = FileHandle::open(&session, "cipher", Mode::Write, Creation::CreateNew).unwrap();
    let err = stream::write_from_source(&mut handle, Cursor::new(b"abc".to_vec()), 10, &mut buffer).unwrap_err();
    assert!(matches!(err, Error::LocalIo(_)));
    assert_eq!(err.kind(), "local_io");
    assert_eq!(token.write_sizes(), Vec::<usize>::new());
}

#[test]
fn successful_flow_releases_each_resource_once() {
    let token = MockToken::new(&["dev0"]);
    encrypt(&token, b"hello world").unwrap();
    assert_eq!(token.count(&Event::CloseFile), 1);
    assert_eq!(token.count(&Event::SecureFinit), 1);
    assert_eq!(token.count(&Event::Logout), 1);
    assert_eq!(token.count(&Event::CloseDevice), 1);
    assert_eq!(token.count(&Event::LocalClosed), 1);
    assert_eq!(token.file("cipher").unwrap(), b"hello world");
}

#[test]
fn explicit_close_is_not_repeated_by_drop() {
    let token = MockToken::new(&["dev0"]);
    let session = login(&token, "dev0").unwrap();
    let handle = FileHandle::open(&session, "f", Mode::Write, Creation::CreateNew).unwrap();
    handle.close().unwrap();
    assert_eq!(token.count(&Event::CloseFile), 1);
    session.close();
    assert_eq!(
        token.events(),
        seq(&[
            &login_events("dev0"),
            &[Event::OpenFile("f".into()), Event::CloseFile],
            &teardown_events()
        ])
    );
}

#[test]
fn failed_close_is_reported_once() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::CloseFile, Fault::Code(0x77));
    let session = login(&token, "dev0").unwrap();
    let handle = FileHandle::open(&session, "f", Mode::Write, Creation::CreateNew).unwrap();
    let err = handle.close().unwrap_err();
    assert!(matches!(err, Error::CloseFailed(Failure::Code(0x77))));
    drop(session);
    assert_eq!(token.count(&Event::CloseFile), 1);
    assert_eq!(token.count(&Event::CloseDevice), 1);
}

#[test]
fn logout_failure_does_not_stop_device_release() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::Logout, Fault::Code(0x88));
    let session = login(&token, "dev0").unwrap();
    assert!(session.is_authenticated());
    session.close();
    assert_eq!(token.events(), seq(&[&login_events("dev0"), &teardown_events()]));
}

#[test]
fn zero_devices_abort_before_authentication() {
    let token = MockToken::new(&[]);
    let err = login(&token, "dev0").err().unwrap();
    assert!(matches!(err, Error::NoDeviceFound));
    assert!(token.events().is_empty());

    let mut input = Cursor::new(b"0\n".to_vec());
    let mut output = Vec::new();
    assert!(matches!(
        device::select_interactive(&token, &mut input, &mut output),
        Err(Error::NoDeviceFound)
    ));
    assert!(output.is_empty());
}

#[test]
fn unknown_identifier_is_device_not_found() {
    let token = MockToken::new(&["dev0", "dev1"]);
    match login(&token, "dev9") {
        Err(Error::DeviceNotFound(id)) => assert_eq!(id, "dev9"),
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("unexpected session"),
    }
    assert!(token.events().is_empty());
}

#[test]
fn first_matching_identifier_wins() {
    let token = MockToken::new(&["dev0", "dev1", "dev1"]);
    let session = login(&token, "dev1").unwrap();
    assert_eq!(session.device().info().path, "dev1");
}

#[test]
fn interactive_selection_reprompts_until_valid() {
    let token = MockToken::new(&["dev0", "dev1"]);
    let mut input = Cursor::new(b"7\nabc\n1\n".to_vec());
    let mut output = Vec::new();
    let info = device::select_interactive(&token, &mut input, &mut output).unwrap();
    assert_eq!(info.path, "dev1");

    let shown = String::from_utf8(output).unwrap();
    assert!(shown.contains("Device [ 0]: dev0"));
    assert!(shown.contains("Device [ 1]: dev1"));
    assert_eq!(shown.matches("ERROR: enter a device number in the list.").count(), 2);
}

#[test]
fn interactive_selection_end_of_input_is_interrupted() {
    let token = MockToken::new(&["dev0"]);
    let mut input = Cursor::new(b"5\n".to_vec());
    let mut output = Vec::new();
    assert!(matches!(
        device::select_interactive(&token, &mut input, &mut output),
        Err(Error::Interrupted)
    ));
}

#[test]
fn wrong_password_is_retried_on_the_same_device() {
    let token = MockToken::new(&["dev0"]);
    let device = Device::open(&token, device::select_by_identifier(&token, "dev0").unwrap()).unwrap();
    let mut answers = vec!["nope", "still", PIN].into_iter();
    let session = session::authenticate(device, Attempts::new(3), |_| {
        Ok(Zeroizing::new(answers.next().unwrap().to_string()))
    })
    .unwrap();
    assert!(session.is_authenticated());
    assert!(session.clock() > 0);
    assert_eq!(token.count(&Event::Open("dev0".into())), 1);
    assert_eq!(token.count(&Event::Login), 3);
}

#[test]
fn wrong_password_aborts_when_attempts_run_out() {
    let token = MockToken::new(&["dev0"]);
    let device = Device::open(&token, device::select_by_identifier(&token, "dev0").unwrap()).unwrap();
    let mut asked = Vec::new();
    let err = session::authenticate(device, Attempts::new(2), |attempt| {
        asked.push(attempt);
        Ok(Zeroizing::new("wrong".to_string()))
    })
    .err()
    .unwrap();
    assert!(matches!(err, Error::WrongPassword));
    assert_eq!(asked, [1, 2]);
    assert_eq!(
        token.events(),
        [
            Event::Open("dev0".into()),
            Event::Login,
            Event::Login,
            Event::CloseDevice
        ]
    );
}

#[test]
fn over_long_password_releases_device() {
    let token = MockToken::new(&["dev0"]);
    let device = Device::open(&token, device::select_by_identifier(&token, "dev0").unwrap()).unwrap();
    let err = session::authenticate(device, Attempts::ONCE, |_| Ok(Zeroizing::new("x".repeat(33))))
        .err()
        .unwrap();
    assert!(matches!(err, Error::CredentialTooLong { limit: 32 }));
    assert_eq!(token.events(), [Event::Open("dev0".into()), Event::CloseDevice]);
}

fn connect() -> Connect {
    Connect {
        peripheral: Some("dev0".into()),
        password: Some(PIN.into()),
        password_stdin: false,
    }
}

#[test]
fn string_commands_round_trip_through_the_token() {
    let token = MockToken::new(&["dev0"]);
    let config = Config::default();
    sefile::commands::run(
        &token,
        Command::WriteCipherFromString {
            connect: connect(),
            input: Some("attack at dawn".into()),
            cipher: "note".into(),
        },
        &config,
    )
    .unwrap();
    assert_eq!(token.write_sizes(), [14]);
    assert_eq!(token.file("note").unwrap(), b"attack at dawn");

    sefile::commands::run(
        &token,
        Command::WriteStringFromCipher {
            connect: connect(),
            cipher: "note".into(),
        },
        &config,
    )
    .unwrap();
    assert_eq!(token.count(&Event::CloseDevice), 2);
}

#[test]
fn configured_peripheral_is_used_when_none_is_given() {
    let token = MockToken::new(&["dev0", "dev1"]).with_listing(b"a.txt\0bb.bin\0");
    let mut config = Config::default();
    config.device.peripheral = Some("dev1".into());
    let connect = Connect {
        peripheral: None,
        ..connect()
    };
    sefile::commands::run(
        &token,
        Command::List {
            connect,
            directory: "vault".into(),
        },
        &config,
    )
    .unwrap();
    assert_eq!(
        token.events(),
        seq(&[
            &login_events("dev1"),
            &[Event::List("vault".into())],
            &teardown_events()
        ])
    );
}

#[test]
fn list_failure_releases_session() {
    let token = MockToken::new(&["dev0"]);
    token.fail(Step::List, Fault::Code(0x99));
    let err = sefile::commands::run(
        &token,
        Command::List {
            connect: connect(),
            directory: ".".into(),
        },
        &Config::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::ListFailed(0x99)));
    assert_eq!(err.kind(), "list_failed");
    assert_eq!(token.count(&Event::CloseDevice), 1);
}

#[test]
fn command_with_no_devices_never_logs_in() {
    let token = MockToken::new(&[]);
    let err = sefile::commands::run(
        &token,
        Command::WriteStringFromCipher {
            connect: connect(),
            cipher: "note".into(),
        },
        &Config::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::NoDeviceFound));
    assert_eq!(token.count(&Event::Login), 0);
}

#[test]
fn missing_input_never_touches_the_cipher() {
    let token = MockToken::new(&["dev0"]);
    token.put_file("cipher", b"previous");
    let dir = tempfile::TempDir::new().unwrap();
    let err = sefile::commands::run(
        &token,
        Command::WriteCipherFromFile {
            connect: connect(),
            input: dir.path().join("absent.txt"),
            cipher: "cipher".into(),
        },
        &Config::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::LocalIo(_)));
    assert_eq!(token.count(&Event::OpenFile("cipher".into())), 0);
    assert_eq!(token.file("cipher").unwrap(), b"previous");
    assert_eq!(token.events(), seq(&[&login_events("dev0"), &teardown_events()]));
}

#[test]
fn failed_cipher_close_removes_decrypted_output() {
    let token = MockToken::new(&["dev0"]);
    token.put_file("cipher", b"plaintext");
    token.fail(Step::CloseFile, Fault::Code(0x5a));
    let dir = tempfile::TempDir::new().unwrap();
    let output = dir.path().join("out.txt");
    let err = sefile::commands::run(
        &token,
        Command::WriteFileFromCipher {
            connect: connect(),
            cipher: "cipher".into(),
            output: output.clone(),
            force: false,
        },
        &Config::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::CloseFailed(Failure::Code(0x5a))));
    assert!(!output.exists());
    assert_eq!(token.count(&Event::CloseFile), 1);
    assert_eq!(token.count(&Event::AbortFile), 0);
    assert_eq!(token.count(&Event::CloseDevice), 1);
}

#[test]
fn bare_drive_letter_selects_the_drive_root() {
    let token = MockToken::new(&["D:\\", "E:\\"]);
    for id in ["E", "e", "E:"] {
        let info = device::select_by_identifier(&token, id).unwrap();
        assert_eq!(info.path, "E:\\");
    }
    assert!(matches!(
        device::select_by_identifier(&token, "F"),
        Err(Error::DeviceNotFound(id)) if id == "F"
    ));
}
