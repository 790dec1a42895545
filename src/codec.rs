//! JSON encode/decode helpers shared by [`crate::message`] and
//! [`crate::transport`], centralizing the `RawValue` boundary so the rest of
//! the crate never hand-rolls `serde_json::to_string`/`from_str` on a body.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::value::RawValue;

use crate::error::Error;

/// Encode a typed value into an envelope body. `()` encodes to `None` (no
/// body on the wire) rather than the literal JSON `null`, matching
/// "absent/null" being interchangeable on the wire.
pub fn encode<T: Serialize>(value: &T) -> Result<Option<Box<RawValue>>, Error> {
    if serde_json::to_value(value).map_err(Error::Encode)? == serde_json::Value::Null {
        return Ok(None);
    }
    serde_json::value::to_raw_value(value)
        .map(Some)
        .map_err(Error::Encode)
}

/// Decode an envelope body into a typed value. A missing body decodes as
/// JSON `null`, so `T = ()` and `Option<_>` fields both work without a body
/// present.
pub fn decode<T: DeserializeOwned>(body: Option<&RawValue>) -> Result<T, Error> {
    match body {
        Some(raw) => serde_json::from_str(raw.get()).map_err(Error::Decode),
        None => serde_json::from_value(serde_json::Value::Null).map_err(Error::Decode),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[rstest]
    fn round_trips_a_struct() {
        let body = encode(&Ping { n: 7 }).expect("encode").expect("non-null body");
        let back: Ping = decode(Some(&body)).expect("decode");
        assert_eq!(back, Ping { n: 7 });
    }

    #[rstest]
    fn unit_encodes_to_no_body() {
        let body = encode(&()).expect("encode");
        assert!(body.is_none());
    }

    #[rstest]
    fn no_body_decodes_to_unit() {
        let () = decode(None).expect("decode unit from absent body");
    }

    #[rstest]
    fn no_body_decodes_to_none_option() {
        let value: Option<Ping> = decode(None).expect("decode option from absent body");
        assert!(value.is_none());
    }
}
