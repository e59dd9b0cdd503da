//! Read-modify-write semantics of the atomic mutation types.
//!
//! All integer operands are little-endian and of arbitrary width; the result
//! always takes the operand's width. A missing value behaves like an empty
//! one except where noted.

use crate::MutationType;

/// Largest value `AppendIfFits` will produce.
pub const VALUE_SIZE_LIMIT: usize = 100_000;

impl MutationType {
    /// Evaluates this mutation against the current value of its key.
    ///
    /// Returns the new value, or `None` when the key ends up cleared.
    /// [`MutationType::ClearRange`] is a range operation and always yields
    /// `None` here.
    pub fn evaluate(self, existing: Option<&[u8]>, operand: &[u8]) -> Option<Vec<u8>> {
        let current = existing.unwrap_or_default();
        match self {
            MutationType::SetValue => Some(operand.to_vec()),
            MutationType::ClearRange => None,
            MutationType::AddValue => Some(add(current, operand)),
            MutationType::And => Some(and(current, operand)),
            MutationType::AndV2 => Some(if current.is_empty() {
                operand.to_vec()
            } else {
                and(current, operand)
            }),
            MutationType::Or => Some(bitwise(current, operand, |a, b| a | b)),
            MutationType::Xor => Some(bitwise(current, operand, |a, b| a ^ b)),
            MutationType::AppendIfFits => Some(append_if_fits(current, operand)),
            MutationType::Max => Some(max(current, operand)),
            MutationType::Min => Some(min(current, operand)),
            MutationType::MinV2 => Some(if current.is_empty() {
                operand.to_vec()
            } else {
                min(current, operand)
            }),
            MutationType::ByteMin => Some(if operand.is_empty() || current.is_empty() {
                operand.to_vec()
            } else {
                std::cmp::min(current, operand).to_vec()
            }),
            MutationType::ByteMax => Some(if operand.is_empty() || current.is_empty() {
                operand.to_vec()
            } else {
                std::cmp::max(current, operand).to_vec()
            }),
            MutationType::CompareAndClear => match existing {
                Some(value) if value == operand => None,
                Some(value) => Some(value.to_vec()),
                None => None,
            },
        }
    }
}

fn add(current: &[u8], operand: &[u8]) -> Vec<u8> {
    if current.is_empty() || operand.is_empty() {
        return operand.to_vec();
    }
    let mut out = Vec::with_capacity(operand.len());
    let mut carry = 0u16;
    for (i, &b) in operand.iter().enumerate() {
        let sum = u16::from(b) + u16::from(current.get(i).copied().unwrap_or(0)) + carry;
        out.push(sum as u8);
        carry = sum >> 8;
    }
    out
}

fn and(current: &[u8], operand: &[u8]) -> Vec<u8> {
    operand
        .iter()
        .enumerate()
        .map(|(i, &b)| current.get(i).map_or(0, |&c| c & b))
        .collect()
}

fn bitwise(current: &[u8], operand: &[u8], op: impl Fn(u8, u8) -> u8) -> Vec<u8> {
    if current.is_empty() || operand.is_empty() {
        return operand.to_vec();
    }
    operand
        .iter()
        .enumerate()
        .map(|(i, &b)| current.get(i).map_or(b, |&c| op(c, b)))
        .collect()
}

fn append_if_fits(current: &[u8], operand: &[u8]) -> Vec<u8> {
    if current.is_empty() {
        return operand.to_vec();
    }
    if operand.is_empty() || current.len() + operand.len() > VALUE_SIZE_LIMIT {
        return current.to_vec();
    }
    let mut out = current.to_vec();
    out.extend_from_slice(operand);
    out
}

/// The current value truncated or zero-extended to the operand's width.
fn resized(current: &[u8], width: usize) -> Vec<u8> {
    let mut out: Vec<u8> = current.iter().copied().take(width).collect();
    out.resize(width, 0);
    out
}

/// Compares `current` and `operand` as little-endian unsigned integers at
/// the operand's width. Bytes of `current` beyond that width are ignored.
fn compare_le(current: &[u8], operand: &[u8]) -> std::cmp::Ordering {
    for i in (0..operand.len()).rev() {
        let c = current.get(i).copied().unwrap_or(0);
        match operand[i].cmp(&c) {
            std::cmp::Ordering::Equal => {}
            other => return other.reverse(),
        }
    }
    std::cmp::Ordering::Equal
}

fn max(current: &[u8], operand: &[u8]) -> Vec<u8> {
    if current.is_empty() || operand.is_empty() {
        return operand.to_vec();
    }
    if compare_le(current, operand).is_gt() {
        resized(current, operand.len())
    } else {
        operand.to_vec()
    }
}

fn min(current: &[u8], operand: &[u8]) -> Vec<u8> {
    if operand.is_empty() {
        return operand.to_vec();
    }
    if compare_le(current, operand).is_lt() {
        resized(current, operand.len())
    } else {
        operand.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn le(n: u32) -> Vec<u8> {
        n.to_le_bytes().to_vec()
    }

    #[test]
    fn test_add_carries_and_keeps_operand_width() {
        let out = MutationType::AddValue.evaluate(Some(le(0xff).as_slice()), &le(1)).unwrap();
        assert_eq!(out, le(0x100));

        let narrow = MutationType::AddValue.evaluate(Some([0xff, 0xff].as_slice()), &[1]).unwrap();
        assert_eq!(narrow, vec![0]);
    }

    #[test]
    fn test_add_on_missing_value_is_operand() {
        let out = MutationType::AddValue.evaluate(None, &le(5)).unwrap();
        assert_eq!(out, le(5));
    }

    #[test_case(MutationType::And, None => vec![0, 0]; "and missing zeroes")]
    #[test_case(MutationType::AndV2, None => vec![0x0f, 0xf0]; "and v2 missing is operand")]
    #[test_case(MutationType::And, Some(vec![0xff]) => vec![0x0f, 0]; "and short current")]
    #[test_case(MutationType::Or, Some(vec![0x01]) => vec![0x0f, 0xf0]; "or")]
    #[test_case(MutationType::Xor, Some(vec![0xff, 0xff]) => vec![0xf0, 0x0f]; "xor")]
    fn test_bitwise(kind: MutationType, current: Option<Vec<u8>>) -> Vec<u8> {
        kind.evaluate(current.as_deref(), &[0x0f, 0xf0]).unwrap()
    }

    #[test]
    fn test_max_min_little_endian() {
        assert_eq!(MutationType::Max.evaluate(Some(le(10).as_slice()), &le(7)).unwrap(), le(10));
        assert_eq!(MutationType::Max.evaluate(Some(le(3).as_slice()), &le(7)).unwrap(), le(7));
        assert_eq!(MutationType::Min.evaluate(Some(le(10).as_slice()), &le(7)).unwrap(), le(7));
        assert_eq!(MutationType::Min.evaluate(Some(le(3).as_slice()), &le(7)).unwrap(), le(3));
    }

    #[test]
    fn test_min_missing_versus_min_v2() {
        assert_eq!(MutationType::Min.evaluate(None, &le(7)).unwrap(), le(0));
        assert_eq!(MutationType::MinV2.evaluate(None, &le(7)).unwrap(), le(7));
    }

    #[test]
    fn test_byte_min_max_lexicographic() {
        assert_eq!(MutationType::ByteMin.evaluate(Some(b"b".as_slice()), b"ab").unwrap(), b"ab");
        assert_eq!(MutationType::ByteMax.evaluate(Some(b"b".as_slice()), b"ab").unwrap(), b"b");
    }

    #[test]
    fn test_append_if_fits_respects_limit() {
        let big = vec![1u8; VALUE_SIZE_LIMIT];
        assert_eq!(MutationType::AppendIfFits.evaluate(Some(big.as_slice()), b"x").unwrap(), big);
        assert_eq!(
            MutationType::AppendIfFits.evaluate(Some(b"ab".as_slice()), b"c").unwrap(),
            b"abc"
        );
    }

    #[test]
    fn test_compare_and_clear() {
        assert_eq!(MutationType::CompareAndClear.evaluate(Some(b"v".as_slice()), b"v"), None);
        assert_eq!(
            MutationType::CompareAndClear.evaluate(Some(b"w".as_slice()), b"v"),
            Some(b"w".to_vec())
        );
        assert_eq!(MutationType::CompareAndClear.evaluate(None, b"v"), None);
    }
}
