//! Get command implementation.

use super::Target;
use tidedb_core::decode_value;

/// Runs the get command.
///
/// Values are decoded from CBOR and printed as JSON. Values JSON cannot
/// represent (for example maps with non-string keys) are printed as hex.
pub fn run(target: &Target, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = target.open()?;
    let payload = engine.get_raw(id)?;
    engine.close()?;

    let Some(payload) = payload else {
        return Err(format!("No value stored under {id:?}").into());
    };

    match decode_value::<serde_json::Value>(&payload) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{} bytes: {}", payload.len(), hex(&payload)),
    }

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_formatting() {
        assert_eq!(hex(&[0x00, 0xab, 0x7f]), "00ab7f");
        assert_eq!(hex(&[]), "");
    }
}
