//! Tests for reassembly header validation and wire encoding.

use rstest::rstest;

use crate::{
    checksum::Checksum,
    fragment::{
        ChecksumField,
        Fragment,
        FragmentIndex,
        Nonce,
        OperationIdentity,
        ReassemblyHeader,
        ReassemblyOperation,
        ValidationError,
    },
    wire::WireRecord,
};

fn header() -> ReassemblyHeader {
    ReassemblyHeader {
        cardinality: 2,
        checksum: Checksum::compute(b"whole payload").to_vec(),
        nonce: Nonce::new(5),
        size: 13,
    }
}

#[test]
fn header_identity_is_nonce_and_checksum() {
    let identity = header().identity().expect("valid header");
    assert_eq!(
        identity,
        OperationIdentity::operation(Nonce::new(5), Checksum::compute(b"whole payload"))
    );
    assert_eq!(identity.index(), None);
}

#[rstest]
#[case(Vec::new())]
#[case(vec![0_u8; 8])]
#[case(vec![0_u8; 20])]
fn header_with_mis_sized_checksum_is_malformed(#[case] checksum: Vec<u8>) {
    let header = ReassemblyHeader {
        checksum,
        ..header()
    };
    assert!(matches!(
        header.validate(),
        Err(ValidationError::ChecksumLength {
            field: ChecksumField::Header,
            ..
        })
    ));
}

#[test]
fn header_with_zero_cardinality_is_malformed() {
    let header = ReassemblyHeader {
        cardinality: 0,
        ..header()
    };
    assert_eq!(header.validate(), Err(ValidationError::ZeroCardinality));
}

#[test]
fn received_operations_start_without_payload() {
    let operation = ReassemblyOperation::from(header());
    assert_eq!(operation.payload(), None);
    assert_eq!(operation.cardinality(), 2);
    assert_eq!(operation.size(), 13);
    assert_eq!(operation.nonce(), Nonce::new(5));
}

#[test]
fn header_survives_the_wire() {
    let encoded = header().to_wire().expect("encode header");
    assert_eq!(
        ReassemblyHeader::from_wire(&encoded).expect("decode header"),
        header()
    );
}

#[test]
fn fragment_bytes_do_not_decode_as_a_header() {
    let fragment = Fragment {
        index: FragmentIndex::zero(),
        cardinality: 1,
        nonce: Nonce::new(5),
        reassembled_checksum: Checksum::compute(b"x").to_vec(),
        checksum: Checksum::compute(b"x").to_vec(),
        payload_size: 1,
        payload: b"x".to_vec(),
    };
    let encoded = fragment.to_wire().expect("encode fragment");
    assert!(ReassemblyHeader::from_wire(&encoded).is_err());
    assert_eq!(Fragment::from_wire(&encoded).expect("decode fragment"), fragment);
}
