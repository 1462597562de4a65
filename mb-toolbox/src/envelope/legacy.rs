//! Decoder for the PHP `serialize()` format older producers still publish.
//!
//! Values are decoded into `serde_json::Value` so both wire formats share one
//! in-memory representation. Arrays whose keys are exactly `0..n` in order
//! become JSON arrays, any other array or object becomes a JSON object.

use serde_json::{Map, Number, Value};

/// Legacy encoding of boolean `false`.
pub const LEGACY_FALSE: &[u8] = b"b:0;";

/// Nesting limit for arrays and objects.
const MAX_DEPTH: usize = 128;

/// Decode a complete legacy payload. Trailing bytes are an error.
pub fn unserialize(raw: &[u8]) -> Result<Value, String> {
    let mut cursor = LegacyCursor::new(raw);
    let value = cursor.read_value(0)?;
    if cursor.has_remaining(1) {
        return Err(format!("Trailing data at offset {}", cursor.offset));
    }
    Ok(value)
}

struct LegacyCursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> LegacyCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Offset just past the next `len` bytes, if they are all present.
    fn end_of(&self, len: usize) -> Option<usize> {
        self.offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
    }

    fn has_remaining(&self, len: usize) -> bool {
        self.end_of(len).is_some()
    }

    fn read_u8(&mut self) -> Result<u8, String> {
        if !self.has_remaining(1) {
            return Err("Payload too short".to_string());
        }
        let val = self.data[self.offset];
        self.offset += 1;
        Ok(val)
    }

    fn expect(&mut self, expected: u8) -> Result<(), String> {
        let found = self.read_u8()?;
        if found != expected {
            return Err(format!(
                "Expected '{}' at offset {}, found '{}'",
                expected as char,
                self.offset - 1,
                found as char
            ));
        }
        Ok(())
    }

    /// Read bytes up to (not including) `terminator`, consuming the terminator.
    fn read_until(&mut self, terminator: u8) -> Result<&'a str, String> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.offset..];
        let len = rest
            .iter()
            .position(|&b| b == terminator)
            .ok_or_else(|| format!("Missing '{}'", terminator as char))?;
        let token = std::str::from_utf8(&rest[..len])
            .map_err(|e| format!("Invalid token at offset {}: {}", self.offset, e))?;
        self.offset += len + 1;
        Ok(token)
    }

    fn read_len(&mut self) -> Result<usize, String> {
        let token = self.read_until(b':')?;
        token
            .parse()
            .map_err(|_| format!("Invalid length '{}'", token))
    }

    /// `"<len bytes>"` with the length already read.
    fn read_quoted(&mut self, len: usize) -> Result<&'a [u8], String> {
        self.expect(b'"')?;
        let end = self
            .end_of(len)
            .ok_or_else(|| format!("Incomplete string: expected {} bytes", len))?;
        let data: &'a [u8] = self.data;
        let bytes = &data[self.offset..end];
        self.offset = end;
        self.expect(b'"')?;
        Ok(bytes)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, String> {
        if depth > MAX_DEPTH {
            return Err("Nesting too deep".to_string());
        }

        let tag = self.read_u8()?;
        match tag {
            b'N' => {
                self.expect(b';')?;
                Ok(Value::Null)
            }
            b'b' => {
                self.expect(b':')?;
                match self.read_until(b';')? {
                    "0" => Ok(Value::Bool(false)),
                    "1" => Ok(Value::Bool(true)),
                    other => Err(format!("Invalid boolean '{}'", other)),
                }
            }
            b'i' => {
                self.expect(b':')?;
                let token = self.read_until(b';')?;
                token
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("Invalid integer '{}'", token))
            }
            b'd' => {
                self.expect(b':')?;
                let token = self.read_until(b';')?;
                match token {
                    // Not representable in JSON
                    "INF" | "-INF" | "NAN" => Ok(Value::Null),
                    _ => {
                        let float = token
                            .parse::<f64>()
                            .map_err(|_| format!("Invalid float '{}'", token))?;
                        Ok(Number::from_f64(float).map_or(Value::Null, Value::Number))
                    }
                }
            }
            b's' => {
                self.expect(b':')?;
                let len = self.read_len()?;
                let bytes = self.read_quoted(len)?;
                self.expect(b';')?;
                Ok(Value::String(String::from_utf8_lossy(bytes).into_owned()))
            }
            b'a' => {
                self.expect(b':')?;
                let count = self.read_len()?;
                self.read_entries(count, depth, false)
            }
            b'O' => {
                self.expect(b':')?;
                let len = self.read_len()?;
                self.read_quoted(len)?;
                self.expect(b':')?;
                let count = self.read_len()?;
                self.read_entries(count, depth, true)
            }
            other => Err(format!(
                "Unsupported type '{}' at offset {}",
                other as char,
                self.offset - 1
            )),
        }
    }

    /// `{key;value...}` for arrays and objects.
    fn read_entries(&mut self, count: usize, depth: usize, object: bool) -> Result<Value, String> {
        self.expect(b'{')?;

        let mut entries: Vec<(Value, Value)> = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let key = self.read_value(depth + 1)?;
            if !matches!(key, Value::Number(_) | Value::String(_)) {
                return Err(format!("Invalid key at offset {}", self.offset));
            }
            let value = self.read_value(depth + 1)?;
            entries.push((key, value));
        }

        self.expect(b'}')?;

        let sequential = !object
            && entries
                .iter()
                .enumerate()
                .all(|(i, (key, _))| key.as_u64() == Some(i as u64));

        if sequential {
            return Ok(Value::Array(entries.into_iter().map(|(_, v)| v).collect()));
        }

        let mut map = Map::with_capacity(entries.len());
        for (key, value) in entries {
            let name = match key {
                Value::String(s) if object => strip_visibility(&s).to_string(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            map.insert(name, value);
        }
        Ok(Value::Object(map))
    }
}

/// Private and protected properties are prefixed `\0Class\0` and `\0*\0`.
fn strip_visibility(name: &str) -> &str {
    match name.strip_prefix('\0') {
        Some(rest) => rest.split_once('\0').map_or(rest, |(_, prop)| prop),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(unserialize(b"N;").unwrap(), Value::Null);
        assert_eq!(unserialize(LEGACY_FALSE).unwrap(), json!(false));
        assert_eq!(unserialize(b"b:1;").unwrap(), json!(true));
        assert_eq!(unserialize(b"i:-42;").unwrap(), json!(-42));
        assert_eq!(unserialize(b"d:0.5;").unwrap(), json!(0.5));
        assert_eq!(unserialize(b"d:INF;").unwrap(), Value::Null);
    }

    #[test]
    fn test_string_length_is_in_bytes() {
        assert_eq!(unserialize("s:5:\"caf\u{e9}\";".as_bytes()).unwrap(), json!("café"));
        assert_eq!(unserialize(b"s:5:\"a\"b;c\";").unwrap(), json!("a\"b;c"));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let value = unserialize(b"s:2:\"\xff\xfe\";").unwrap();
        assert_eq!(value, json!("\u{fffd}\u{fffd}"));
    }

    #[test]
    fn test_associative_array() {
        let raw = br#"a:2:{s:5:"email";s:7:"a@b.com";s:3:"uid";i:12;}"#;
        assert_eq!(unserialize(raw).unwrap(), json!({"email": "a@b.com", "uid": 12}));
    }

    #[test]
    fn test_list_array() {
        let raw = br#"a:2:{i:0;s:1:"x";i:1;s:1:"y";}"#;
        assert_eq!(unserialize(raw).unwrap(), json!(["x", "y"]));
    }

    #[test]
    fn test_sparse_array_becomes_object() {
        let raw = br#"a:2:{i:0;s:1:"x";i:2;s:1:"y";}"#;
        assert_eq!(unserialize(raw).unwrap(), json!({"0": "x", "2": "y"}));
    }

    #[test]
    fn test_empty_object() {
        assert_eq!(unserialize(br#"O:8:"stdClass":0:{}"#).unwrap(), json!({}));
    }

    #[test]
    fn test_object_visibility_markers() {
        let raw = b"O:4:\"User\":2:{s:10:\"\0User\0name\";s:3:\"Ann\";s:6:\"\0*\0age\";i:30;}";
        assert_eq!(unserialize(raw).unwrap(), json!({"name": "Ann", "age": 30}));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(unserialize(b"").is_err());
        assert!(unserialize(br#"{"email":"a@b.com"}"#).is_err());
        assert!(unserialize(b"s:10:\"short\";").is_err());
        assert!(unserialize(b"i:1;trailing").is_err());
        assert!(unserialize(b"a:1:{i:0;r:1;}").is_err());
        assert!(unserialize(b"b:2;").is_err());
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let string = format!("s:{}:\"x\";", usize::MAX);
        let object = format!("O:{}:\"stdClass\":0:{{}}", usize::MAX);
        let object_name = format!("O:{}:\"stdClass\":0:{{}}", usize::MAX - 1);

        assert!(unserialize(string.as_bytes()).is_err());
        assert!(unserialize(object.as_bytes()).is_err());
        assert!(unserialize(object_name.as_bytes()).is_err());
    }

    #[test]
    fn test_oversized_element_count_is_rejected() {
        let raw = format!("a:{}:{{i:0;N;}}", usize::MAX);
        assert!(unserialize(raw.as_bytes()).is_err());
    }
}
