//! Data elements for the `.data` segment.

use super::element::ProgramElement;
use super::lexer::Token;

/// The kinds of value a data line can hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    /// ASCII bytes followed by a NUL.
    String(String),
    /// One big-endian 16-bit word.
    Integer(i16),
    /// `.int N`: N zeroed words.
    Words(u16),
    /// `.byte N`: N zeroed bytes.
    Bytes(u16),
    /// `.image "path"`: index of the image in the graphics list.
    Image(u16),
    /// Holds labels left over at end of input.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    pub element: ProgramElement,
    /// First token of the line; layout errors are reported here.
    pub token: Token,
    pub value: DataValue,
}

impl DataElement {
    pub fn new(element: ProgramElement, token: Token, value: DataValue) -> Self {
        Self { element, token, value }
    }

    pub fn size(&self) -> u16 {
        match &self.value {
            DataValue::String(s) => s.len() as u16 + 1,
            DataValue::Integer(_) | DataValue::Image(_) => 2,
            DataValue::Words(n) => n.saturating_mul(2),
            DataValue::Bytes(n) => *n,
            DataValue::Empty => 0,
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        match &self.value {
            DataValue::String(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            DataValue::Integer(v) => v.to_be_bytes().to_vec(),
            DataValue::Image(index) => index.to_be_bytes().to_vec(),
            DataValue::Words(_) | DataValue::Bytes(_) => vec![0; self.size() as usize],
            DataValue::Empty => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::lexer::tokenize;

    fn data(value: DataValue) -> DataElement {
        let token = tokenize("x").remove(0);
        DataElement::new(ProgramElement::new(Vec::new(), 1), token, value)
    }

    #[test]
    fn test_string_is_nul_terminated() {
        let d = data(DataValue::String("hi".into()));
        assert_eq!(d.size(), 3);
        assert_eq!(d.bytes(), b"hi\0");
    }

    #[test]
    fn test_integer_is_big_endian() {
        assert_eq!(data(DataValue::Integer(0x1234)).bytes(), vec![0x12, 0x34]);
        assert_eq!(data(DataValue::Integer(-1)).bytes(), vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_reservations() {
        assert_eq!(data(DataValue::Words(3)).bytes(), vec![0; 6]);
        assert_eq!(data(DataValue::Bytes(5)).size(), 5);
        assert_eq!(data(DataValue::Image(2)).bytes(), vec![0, 2]);
        assert!(data(DataValue::Empty).bytes().is_empty());
    }
}
