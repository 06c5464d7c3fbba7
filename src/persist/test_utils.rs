macro_rules! test_roundtrip {
    ($t:ty, $name:ident) => {
        proptest::proptest! {
            #![proptest_config(proptest::prelude::ProptestConfig{fork: false, ..Default::default()})]
            #[test]
            fn $name(orig: $t) {
                use std::io::Cursor;

                use crate::persist::traits::{ReadType, WriteType};

                let mut buf = Cursor::new(Vec::<u8>::new());
                match orig.write(&mut buf) {
                    Err(_) => {
                        // unencodable input (e.g. oversized string), skip
                    }
                    Ok(()) => {
                        let l = buf.position();
                        buf.set_position(0);

                        let restored = <$t>::read(&mut buf).unwrap();
                        assert_eq!(orig, restored);

                        // the reader must consume exactly what the writer produced
                        assert_eq!(buf.position(), l);
                    }
                }
            }
        }
    };
}

pub(crate) use test_roundtrip;
