//! Integration tests for the broker wire format
//!
//! Verifies the frame layouts a libusb client relies on and the string codec's
//! compatibility with Java's `writeUTF`/`readUTF`.

use protocol::{
    DeviceEvent, DeviceState, MAX_STRING_LEN, ProtocolError, encode_event, encode_string,
    mutf8, read_event, read_string, snapshot_end, write_string,
};
use proptest::prelude::*;
use std::io::Cursor;

mod directory_stream {
    use super::*;

    #[test]
    fn test_snapshot_then_live_events() {
        let mut wire = Vec::new();
        for name in ["/dev/bus/usb/001/002", "/dev/bus/usb/002/007"] {
            wire.extend_from_slice(&encode_string(name).unwrap());
        }
        wire.extend_from_slice(&snapshot_end());
        wire.extend_from_slice(&encode_event(&DeviceEvent::attached("/dev/bus/usb/001/009")).unwrap());

        let mut cursor = Cursor::new(wire);
        let mut snapshot = Vec::new();
        loop {
            let name = read_string(&mut cursor).unwrap();
            if name.is_empty() {
                break;
            }
            snapshot.push(name);
        }
        assert_eq!(snapshot, ["/dev/bus/usb/001/002", "/dev/bus/usb/002/007"]);

        let event = read_event(&mut cursor).unwrap();
        assert_eq!(event.state, DeviceState::Attached);
        assert_eq!(event.device, "/dev/bus/usb/001/009");
    }

    #[test]
    fn test_writer_and_encoder_agree() {
        let mut written = Vec::new();
        write_string(&mut written, "héllo\0").unwrap();
        assert_eq!(written, encode_string("héllo\0").unwrap().to_vec());
    }
}

mod java_compatibility {
    use super::*;

    #[test]
    fn test_known_writeutf_output() {
        // DataOutputStream.writeUTF("é€") -> 00 05 C3 A9 E2 82 AC
        let frame = encode_string("é€").unwrap();
        assert_eq!(frame.to_vec(), vec![0x00, 0x05, 0xC3, 0xA9, 0xE2, 0x82, 0xAC]);
    }

    #[test]
    fn test_overlong_nul_is_accepted() {
        assert_eq!(mutf8::decode(&[0xC0, 0x80]).unwrap(), "\0");
    }

    #[test]
    fn test_length_limit_counts_encoded_bytes() {
        // 'é' is two bytes encoded, so half the limit in chars already overflows
        let s = "é".repeat(MAX_STRING_LEN / 2 + 1);
        assert!(matches!(
            encode_string(&s),
            Err(ProtocolError::StringTooLong { .. })
        ));
    }
}

proptest! {
    #[test]
    fn prop_string_codec_preserves_text(s in "\\PC{0,64}") {
        let frame = encode_string(&s).unwrap();
        let decoded = read_string(&mut Cursor::new(frame.to_vec())).unwrap();
        prop_assert_eq!(decoded, s);
    }

    #[test]
    fn prop_encoding_never_contains_zero(s in any::<String>()) {
        prop_assert!(!mutf8::encode(&s).contains(&0));
    }
}
