use crate::error::{Result, TransceiverError};

/// Smallest encoded unit. One beep carries exactly one symbol.
pub type Symbol = u8;

const SEMITONE: f32 = 1.059_463_1;

/// Fixed mapping between symbols, printable mnemonics and carrier frequencies.
#[derive(Debug, Clone, PartialEq)]
pub struct Alphabet {
    mnemonics: Vec<char>,
    frequencies: Vec<f32>,
}

impl Alphabet {
    pub fn new(mnemonics: &str, frequencies: Vec<f32>) -> Result<Self> {
        let mnemonics: Vec<char> = mnemonics.chars().collect();

        if mnemonics.len() != frequencies.len() {
            return Err(TransceiverError::InvalidConfig(format!(
                "{} mnemonics but {} frequencies",
                mnemonics.len(),
                frequencies.len()
            )));
        }
        if !(4..=256).contains(&mnemonics.len()) {
            return Err(TransceiverError::InvalidConfig(format!(
                "alphabet must have between 4 and 256 symbols, has {}",
                mnemonics.len()
            )));
        }
        for (i, c) in mnemonics.iter().enumerate() {
            if mnemonics[..i].contains(c) {
                return Err(TransceiverError::InvalidConfig(format!(
                    "duplicate mnemonic {:?}",
                    c
                )));
            }
        }
        if frequencies.iter().any(|f| !f.is_finite() || *f <= 0.0) {
            return Err(TransceiverError::InvalidConfig(
                "carrier frequencies must be positive".into(),
            ));
        }
        if frequencies.windows(2).any(|w| w[1] <= w[0]) {
            return Err(TransceiverError::InvalidConfig(
                "carrier frequencies must be strictly increasing".into(),
            ));
        }

        Ok(Self {
            mnemonics,
            frequencies,
        })
    }

    /// Equal-tempered ladder: one semitone between adjacent symbols.
    pub fn semitones(mnemonics: &str, base_frequency: f32) -> Result<Self> {
        let frequencies = (0..mnemonics.chars().count())
            .map(|i| base_frequency * SEMITONE.powi(i as i32))
            .collect();
        Self::new(mnemonics, frequencies)
    }

    /// Evenly spaced ladder starting at `base_frequency`.
    pub fn linear(mnemonics: &str, base_frequency: f32, step: f32) -> Result<Self> {
        let frequencies = (0..mnemonics.chars().count())
            .map(|i| base_frequency + (i as f32) * step)
            .collect();
        Self::new(mnemonics, frequencies)
    }

    pub fn len(&self) -> usize {
        self.mnemonics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mnemonics.is_empty()
    }

    /// Carrier frequency of `symbol`.
    ///
    /// # Panics
    /// If `symbol` is not below [`Alphabet::len`].
    pub fn frequency(&self, symbol: Symbol) -> f32 {
        self.frequencies[symbol as usize]
    }

    /// Printable mnemonic of `symbol`.
    ///
    /// # Panics
    /// If `symbol` is not below [`Alphabet::len`].
    pub fn mnemonic(&self, symbol: Symbol) -> char {
        self.mnemonics[symbol as usize]
    }

    pub fn symbol(&self, mnemonic: char) -> Result<Symbol> {
        self.mnemonics
            .iter()
            .position(|&c| c == mnemonic)
            .map(|i| i as Symbol)
            .ok_or(TransceiverError::UnknownSymbol(mnemonic))
    }

    pub fn contains(&self, symbol: Symbol) -> bool {
        (symbol as usize) < self.len()
    }

    pub fn check(&self, symbol: Symbol) -> Result<Symbol> {
        if self.contains(symbol) {
            Ok(symbol)
        } else {
            Err(TransceiverError::SymbolOutOfRange {
                symbol,
                count: self.len(),
            })
        }
    }

    pub fn parse(&self, text: &str) -> Result<Vec<Symbol>> {
        text.chars().map(|c| self.symbol(c)).collect()
    }

    pub fn format(&self, symbols: &[Symbol]) -> String {
        symbols.iter().map(|&s| self.mnemonic(s)).collect()
    }

    pub fn mnemonics(&self) -> String {
        self.mnemonics.iter().collect()
    }

    pub fn frequencies(&self) -> &[f32] {
        &self.frequencies
    }

    /// Number of whole bits a single symbol can carry.
    pub fn bits_per_symbol(&self) -> u32 {
        usize::BITS - 1 - self.len().leading_zeros()
    }

    pub fn min_spacing(&self) -> f32 {
        self.frequencies
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(f32::INFINITY, f32::min)
    }

    pub fn max_frequency(&self) -> f32 {
        self.frequencies.last().copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_ladder() {
        let alphabet = Alphabet::linear("ABCDEFGH", 800.0, 100.0).unwrap();
        assert_eq!(alphabet.len(), 8);
        assert_eq!(alphabet.frequency(0), 800.0);
        assert_eq!(alphabet.frequency(7), 1500.0);
        assert_eq!(alphabet.bits_per_symbol(), 3);
        assert!((alphabet.min_spacing() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_semitone_ladder() {
        let alphabet = Alphabet::semitones("0123456789abcdef", 1760.0).unwrap();
        assert_eq!(alphabet.frequency(0), 1760.0);
        assert!((alphabet.frequency(12) - 3520.0).abs() < 1.0);
        assert_eq!(alphabet.bits_per_symbol(), 4);
    }

    #[test]
    fn test_mnemonic_lookup_is_inverse() {
        let alphabet = Alphabet::linear("ABCDEFGH", 800.0, 100.0).unwrap();
        for s in 0..alphabet.len() as Symbol {
            assert_eq!(alphabet.symbol(alphabet.mnemonic(s)).unwrap(), s);
        }
        assert_eq!(alphabet.parse("ABCD").unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(alphabet.format(&[7, 0]), "HA");
    }

    #[test]
    fn test_unknown_mnemonic() {
        let alphabet = Alphabet::linear("ABCDEFGH", 800.0, 100.0).unwrap();
        assert_eq!(alphabet.symbol('Z'), Err(TransceiverError::UnknownSymbol('Z')));
        assert!(alphabet.parse("ABZ").is_err());
    }

    #[test]
    fn test_rejects_bad_alphabets() {
        assert!(Alphabet::linear("ABC", 800.0, 100.0).is_err());
        assert!(Alphabet::linear("AABC", 800.0, 100.0).is_err());
        assert!(Alphabet::new("ABCD", vec![800.0, 900.0, 900.0, 1000.0]).is_err());
        assert!(Alphabet::new("ABCD", vec![800.0, 900.0]).is_err());
    }

    #[test]
    fn test_bits_per_symbol_rounds_down() {
        let alphabet = Alphabet::linear("ABCDEFGHIJ", 800.0, 100.0).unwrap();
        assert_eq!(alphabet.bits_per_symbol(), 3);
        assert_eq!(alphabet.check(9), Ok(9));
        assert!(alphabet.check(10).is_err());
    }
}
