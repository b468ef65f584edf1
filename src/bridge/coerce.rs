//! Total conversions from engine values to native values.
//!
//! None of these throw. Boxed primitives are unwrapped first; anything else
//! goes through the engine's own coercion under a `TryCatch`, and a throwing
//! `toString`/`valueOf` degrades to `""` or `NaN`.

use std::pin::pin;

/// Native UTF-8 text of `value`. Empty on failure.
pub fn to_native_string(scope: &mut v8::PinScope, value: v8::Local<v8::Value>) -> String {
    if let Ok(boxed) = v8::Local::<v8::StringObject>::try_from(value) {
        let inner = boxed.value_of(scope);
        return inner.to_rust_string_lossy(scope);
    }

    if let Ok(string) = v8::Local::<v8::String>::try_from(value) {
        return string.to_rust_string_lossy(scope);
    }

    let tc = pin!(v8::TryCatch::new(scope));
    let tc = tc.init();

    value
        .to_string(&tc)
        .map(|s| s.to_rust_string_lossy(&tc))
        .unwrap_or_default()
}

/// Numeric value of `value`. `NaN` on failure.
pub fn to_number(scope: &mut v8::PinScope, value: v8::Local<v8::Value>) -> f64 {
    if let Ok(boxed) = v8::Local::<v8::NumberObject>::try_from(value) {
        return boxed.value_of(scope);
    }

    if let Ok(number) = v8::Local::<v8::Number>::try_from(value) {
        return number.value();
    }

    let tc = pin!(v8::TryCatch::new(scope));
    let tc = tc.init();

    value.number_value(&tc).unwrap_or(f64::NAN)
}

/// `true` only for `true` and a boxed `true`. No truthiness.
pub fn to_bool(value: v8::Local<v8::Value>) -> bool {
    if let Ok(boxed) = v8::Local::<v8::BooleanObject>::try_from(value) {
        return boxed.value_of();
    }

    value.is_true()
}

/// UTF-16 code units of `value`'s native text, matching the engine's own
/// string representation.
pub fn to_utf16_buffer(scope: &mut v8::PinScope, value: v8::Local<v8::Value>) -> Vec<u16> {
    utf8_to_utf16(&to_native_string(scope, value))
}

/// Transcode native UTF-8 text to UTF-16 code units.
pub fn utf8_to_utf16(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Integer bits of `number` as a C cast to a 64-bit slot would see them:
/// NaN and infinities become 0, fractions truncate toward zero and
/// out-of-range values wrap modulo 2^64.
pub fn to_integer_bits(number: f64) -> u64 {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

    if !number.is_finite() {
        return 0;
    }

    let truncated = number.trunc();

    if (-TWO_POW_63..TWO_POW_63).contains(&truncated) {
        truncated as i64 as u64
    } else {
        truncated.rem_euclid(TWO_POW_64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_bits_truncate_and_wrap() {
        assert_eq!(to_integer_bits(300.0) as u8, 44);
        assert_eq!(to_integer_bits(-1.0), u64::MAX);
        assert_eq!(to_integer_bits(-7.9) as i64, -7);
        assert_eq!(to_integer_bits(7.9), 7);
        assert_eq!(to_integer_bits(65536.0 + 5.0) as u16, 5);
    }

    #[test]
    fn test_integer_bits_non_finite() {
        assert_eq!(to_integer_bits(f64::NAN), 0);
        assert_eq!(to_integer_bits(f64::INFINITY), 0);
        assert_eq!(to_integer_bits(f64::NEG_INFINITY), 0);
    }

    #[test]
    fn test_integer_bits_beyond_i64() {
        assert_eq!(to_integer_bits(9_223_372_036_854_775_808.0), 1u64 << 63);
        assert_eq!(to_integer_bits(18_446_744_073_709_551_616.0 * 2.0), 0);
    }

    #[test]
    fn test_utf8_to_utf16() {
        assert_eq!(utf8_to_utf16("abc"), vec![0x61, 0x62, 0x63]);
        assert_eq!(utf8_to_utf16("é"), vec![0x00e9]);
        // Astral plane characters become a surrogate pair.
        assert_eq!(utf8_to_utf16("😀"), vec![0xd83d, 0xde00]);
        assert!(utf8_to_utf16("").is_empty());
    }
}
