use proptest::prelude::*;
use rdbcore_primitives::BlobRef;
use rdbcore_sats::buffer::Cursor;
use rdbcore_sats::codec::{self, TYPE_I64};
use rdbcore_sats::value::{Numeric, NumericState};
use rdbcore_sats::TObject;

fn round_trip(value: TObject, column_type: u16) -> TObject {
    let mut buf = Vec::new();
    codec::encode_cell(&value, column_type, &mut buf);
    let mut cur = Cursor::new(&buf);
    let (decoded, _) = codec::decode_cell(&mut cur).unwrap();
    decoded
}

fn scalar_values() -> impl Strategy<Value = TObject> {
    prop_oneof![
        Just(TObject::Null),
        any::<bool>().prop_map(TObject::Boolean),
        any::<i64>().prop_map(TObject::I64),
        any::<i64>().prop_map(TObject::Date),
        ".*".prop_map(TObject::String),
        any::<u64>().prop_map(|id| TObject::Binary(BlobRef::new(id))),
        (any::<u64>(), any::<u32>()).prop_map(|(id, tag)| TObject::Object(BlobRef::new(id), tag)),
    ]
}

fn numeric_values() -> impl Strategy<Value = TObject> {
    (any::<i16>(), any::<i64>()).prop_map(|(scale, magnitude)| {
        TObject::Numeric(Numeric {
            state: NumericState::Number,
            scale,
            magnitude: magnitude.to_be_bytes().to_vec(),
        })
    })
}

proptest! {
    #[test]
    fn scalar_cells_round_trip(value in scalar_values()) {
        let tag = value.type_tag().unwrap_or(TYPE_I64);
        let decoded = round_trip(value.clone(), tag);
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn numeric_cells_round_trip(value in numeric_values()) {
        let tag = value.type_tag().unwrap();
        let decoded = round_trip(value.clone(), tag);
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn long_strings_round_trip_whether_or_not_they_compress(s in "[a-z]{0,400}") {
        let value = TObject::String(s);
        let tag = value.type_tag().unwrap();
        let decoded = round_trip(value.clone(), tag);
        prop_assert_eq!(decoded, value);
    }
}
