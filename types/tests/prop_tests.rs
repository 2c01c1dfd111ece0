use proptest::prelude::*;

use taler_types::{crock, Amount, AmountError, EddsaPublicKey, HashCode, Timestamp, FRACTIONAL_BASE};

fn currency() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_-]{0,10}"
}

fn amount_in(cur: &'static str) -> impl Strategy<Value = Amount> {
    (0u64..1_000_000_000, 0u32..FRACTIONAL_BASE)
        .prop_map(move |(v, f)| Amount::new(cur, v, f).unwrap())
}

/// Reference normalization of an amount string: upper-case currency, no
/// leading zeros in the value, no trailing zeros in the fraction.
fn normalize(cur: &str, int: &str, frac: &str) -> String {
    let int = int.trim_start_matches('0');
    let int = if int.is_empty() { "0" } else { int };
    let frac = frac.trim_end_matches('0');
    if frac.is_empty() {
        format!("{}:{}", cur.to_ascii_uppercase(), int)
    } else {
        format!("{}:{}.{}", cur.to_ascii_uppercase(), int, frac)
    }
}

proptest! {
    /// stringify(parse(s)) == normalize(s) for every valid amount string.
    #[test]
    fn amount_string_round_trip(
        cur in currency(),
        int in "[0-9]{1,12}",
        frac in proptest::option::of("[0-9]{1,8}"),
    ) {
        let s = match &frac {
            Some(f) => format!("{cur}:{int}.{f}"),
            None => format!("{cur}:{int}"),
        };
        let parsed = Amount::parse(&s).unwrap();
        prop_assert_eq!(parsed.to_string(), normalize(&cur, &int, frac.as_deref().unwrap_or("")));
    }

    /// The suffix form parses to the same amount as the colon form.
    #[test]
    fn suffix_form_matches_colon_form(cur in currency(), int in "[0-9]{1,9}", frac in "[0-9]{1,8}") {
        let a = Amount::parse(&format!("{cur}:{int}.{frac}")).unwrap();
        let b = Amount::parse(&format!("{int}.{frac} {cur}")).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Fraction is always normalized below the base.
    #[test]
    fn fraction_always_normalized(v in 0u64..1_000_000, f in 0u32..u32::MAX) {
        let a = Amount::new("EUR", v, f).unwrap();
        prop_assert!(a.fraction() < FRACTIONAL_BASE);
    }

    /// (a + b) - b == a
    #[test]
    fn add_then_sub_is_identity(a in amount_in("EUR"), b in amount_in("EUR")) {
        let sum = a.checked_add(&b).unwrap();
        prop_assert_eq!(sum.checked_sub(&b).unwrap(), a);
    }

    /// Subtraction fails exactly when the subtrahend is larger.
    #[test]
    fn sub_underflow_iff_smaller(a in amount_in("EUR"), b in amount_in("EUR")) {
        let res = a.checked_sub(&b);
        if a.to_units() < b.to_units() {
            prop_assert_eq!(res, Err(AmountError::Underflow));
        } else {
            prop_assert!(res.is_ok());
        }
    }

    /// Mixing currencies is always an error.
    #[test]
    fn mismatched_currency_never_adds(a in amount_in("EUR"), b in amount_in("USD")) {
        let mismatch = matches!(a.checked_add(&b), Err(AmountError::CurrencyMismatch { .. }));
        prop_assert!(mismatch);
        prop_assert!(a.cmp_checked(&b).is_err());
    }

    /// Crockford decode inverts encode for arbitrary bytes.
    #[test]
    fn crock_round_trip(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        prop_assert_eq!(crock::decode(&crock::encode(&bytes)).unwrap(), bytes);
    }

    /// Key newtypes survive both JSON and bincode.
    #[test]
    fn key_serde_round_trip(bytes in prop::array::uniform32(0u8..)) {
        let key = EddsaPublicKey(bytes);
        let json = serde_json::to_string(&key).unwrap();
        prop_assert_eq!(serde_json::from_str::<EddsaPublicKey>(&json).unwrap(), key);
        let bin = bincode::serialize(&key).unwrap();
        prop_assert_eq!(bincode::deserialize::<EddsaPublicKey>(&bin).unwrap(), key);
    }

    /// HashCode::is_zero is true only for all-zero bytes.
    #[test]
    fn hash_is_zero_correct(first in 0u8..) {
        let mut bytes = [0u8; 64];
        bytes[0] = first;
        prop_assert_eq!(HashCode(bytes).is_zero(), first == 0);
    }

    /// Timestamp ordering: new(a) <= new(b) iff a <= b.
    #[test]
    fn timestamp_ordering(a in 0u64..u64::MAX, b in 0u64..u64::MAX) {
        let ta = Timestamp::new(a);
        let tb = Timestamp::new(b);
        prop_assert_eq!(ta <= tb, a <= b);
        prop_assert_eq!(ta == tb, a == b);
    }
}
