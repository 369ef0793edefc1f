use anyhow::Result;
use sonar_codec::{
    BufferChain, CRC16_SEED, Deframer, FRAME_OVERHEAD, Role, crc16,
    frame::{ESCAPE_BYTE, FLAG_BYTE},
    write_frame,
};

fn encode(
    role: Role,
    is_response: bool,
    is_link_control: bool,
    sequence: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut wire = Vec::new();
    write_frame(
        &mut |byte| wire.push(byte),
        role,
        is_response,
        is_link_control,
        sequence,
        &BufferChain::new(&[payload]),
    );
    wire
}

/// Feeds the wire bytes and collects every completed frame as owned fields.
fn decode(deframer: &mut Deframer, wire: &[u8]) -> Vec<(bool, bool, u8, Vec<u8>)> {
    let mut frames = Vec::new();
    for &byte in wire {
        if let Some(frame) = deframer.push_byte(byte) {
            frames.push((
                frame.is_response,
                frame.is_link_control,
                frame.sequence,
                frame.payload.to_vec(),
            ));
        }
    }
    frames
}

#[test]
fn round_trip_with_escaped_payload() -> Result<()> {
    // Payload exercises both escapable bytes and a few plain ones.
    let payload = [0x7E, 0x7D, 0x00, 0x5E, 0x5D, 0xFF];
    let wire = encode(Role::Client, false, false, 0x42, &payload);

    // Escaping doubled exactly the two special payload bytes.
    let escapes = wire[1..wire.len() - 1]
        .iter()
        .filter(|&&b| b == ESCAPE_BYTE)
        .count();
    assert_eq!(escapes, 2);

    let mut deframer = Deframer::new(Role::Server, 64);
    let frames = decode(&mut deframer, &wire);
    assert_eq!(frames, vec![(false, false, 0x42, payload.to_vec())]);
    assert_eq!(deframer.take_errors(), Default::default());
    Ok(())
}

#[test]
fn escaped_crc_footer_round_trips() -> Result<()> {
    // Sweeping every sequence number produces CRC footers containing flag
    // and escape bytes, exercising the escaping path on the footer too.
    for seq in 0..=255u8 {
        let payload = [seq, 0xA5];
        let wire = encode(Role::Server, true, false, seq, &payload);
        let mut deframer = Deframer::new(Role::Client, 64);
        let frames = decode(&mut deframer, &wire);
        assert_eq!(frames, vec![(true, false, seq, payload.to_vec())]);
    }
    Ok(())
}

#[test]
fn crc_corruption_is_counted_and_dropped() -> Result<()> {
    let mut wire = encode(Role::Client, false, false, 1, &[1, 2, 3]);
    // Flip a payload bit; the frame has no escaped bytes so the CRC no
    // longer matches.
    wire[3] ^= 0x01;

    let mut deframer = Deframer::new(Role::Server, 64);
    assert!(decode(&mut deframer, &wire).is_empty());
    let errors = deframer.take_errors();
    assert_eq!(errors.invalid_crc, 1);
    assert_eq!(deframer.take_errors().invalid_crc, 0);
    Ok(())
}

#[test]
fn reserved_bit_and_bad_version_are_invalid_headers() -> Result<()> {
    for flags in [0x18u8, 0x20, 0x00] {
        let mut body = vec![flags, 0x01];
        let crc = crc16(&body, CRC16_SEED);
        body.extend_from_slice(&crc.to_le_bytes());

        let mut wire = vec![FLAG_BYTE];
        wire.extend_from_slice(&body);
        wire.push(FLAG_BYTE);

        let mut deframer = Deframer::new(Role::Server, 64);
        assert!(decode(&mut deframer, &wire).is_empty());
        assert_eq!(deframer.take_errors().invalid_header, 1, "flags=0x{flags:02x}");
    }
    Ok(())
}

#[test]
fn own_direction_is_rejected() -> Result<()> {
    let wire = encode(Role::Client, false, false, 1, &[]);
    // A client hearing its own direction bit drops the frame.
    let mut deframer = Deframer::new(Role::Client, 64);
    assert!(decode(&mut deframer, &wire).is_empty());
    assert_eq!(deframer.take_errors().invalid_header, 1);
    Ok(())
}

#[test]
fn runt_frames_are_silently_ignored() -> Result<()> {
    let mut deframer = Deframer::new(Role::Server, 64);
    assert!(decode(&mut deframer, &[FLAG_BYTE, 0x10, 0x01, FLAG_BYTE]).is_empty());
    assert_eq!(deframer.take_errors(), Default::default());
    Ok(())
}

#[test]
fn illegal_escape_drops_frame_and_resynchronizes() -> Result<()> {
    let mut deframer = Deframer::new(Role::Server, 64);

    let mut wire = vec![FLAG_BYTE, 0x10, ESCAPE_BYTE, ESCAPE_BYTE, 0xAA];
    let good = encode(Role::Client, false, false, 7, &[9]);
    wire.extend_from_slice(&good);

    let frames = decode(&mut deframer, &wire);
    assert_eq!(frames, vec![(false, false, 7, vec![9])]);
    assert_eq!(deframer.take_errors().invalid_escape_sequence, 1);
    Ok(())
}

#[test]
fn oversized_frame_overflows_once() -> Result<()> {
    let payload = [0u8; 16];
    let wire = encode(Role::Client, false, false, 1, &payload);

    let mut deframer = Deframer::new(Role::Server, 8);
    assert!(decode(&mut deframer, &wire).is_empty());
    assert_eq!(deframer.take_errors().buffer_overflow, 1);
    Ok(())
}

#[test]
fn bytes_outside_frames_are_ignored() -> Result<()> {
    let mut deframer = Deframer::new(Role::Server, 64);
    assert!(decode(&mut deframer, &[0x00, 0x55, ESCAPE_BYTE, 0xAA]).is_empty());
    assert_eq!(deframer.take_errors(), Default::default());

    // A frame arriving after the noise is still decoded.
    let wire = encode(Role::Client, false, true, 3, &[0x12]);
    let frames = decode(&mut deframer, &wire);
    assert_eq!(frames, vec![(false, true, 3, vec![0x12])]);
    Ok(())
}

#[test]
fn shared_flag_terminates_and_opens() -> Result<()> {
    // Two frames with a single flag byte between them.
    let first = encode(Role::Client, false, false, 1, &[0xAA]);
    let second = encode(Role::Client, false, false, 2, &[0xBB]);

    let mut wire = first;
    wire.extend_from_slice(&second[1..]);

    let mut deframer = Deframer::new(Role::Server, 64);
    let frames = decode(&mut deframer, &wire);
    assert_eq!(
        frames,
        vec![(false, false, 1, vec![0xAA]), (false, false, 2, vec![0xBB])]
    );
    Ok(())
}

#[test]
fn frame_overhead_matches_layout() -> Result<()> {
    // Link header, application header and CRC footer.
    assert_eq!(FRAME_OVERHEAD, 6);
    let wire = encode(Role::Client, false, false, 1, &[]);
    // Flags, two header bytes, two CRC bytes, closing flag, no escapes here.
    assert_eq!(wire.len(), 6);
    Ok(())
}
