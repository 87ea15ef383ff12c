//! # Word Module
//!
//! The storage this crate manages is organized in 36-bit words.  A word is held in the low
//! 36 bits of a `u64`.  Every place where the on-disk format packs several values into one word
//! goes through the accessors here, so that the bit layout is written down exactly once.
//!
//! Bit positions count from the least significant bit (bit 0) up to bit 35.  The traditional
//! partial-word names are provided as well:
//! * `H1`,`H2` - upper and lower 18-bit halves
//! * `Q1`..`Q4` - 9-bit quarters, Q1 leftmost
//! * `S1`..`S6` - 6-bit sixths, S1 leftmost
//!
//! Text comes in two flavors.  Catalog names are Fieldata, 6 characters per word.
//! Pack labels use ASCII, 4 characters per word (one per quarter word).

/// A 36-bit word held in the low bits of a u64
pub type Word = u64;

pub const WORD_BITS: usize = 36;
pub const WORD_MASK: Word = 0o777777777777;
pub const H_MASK: Word = 0o777777;

/// Fieldata code points 0o00 through 0o77
const FIELDATA: &[u8;64] = b"@[]#^ ABCDEFGHIJKLMNOPQRSTUVWXYZ)-+<=>&$*(%:?!,\\0123456789';/.\"_";
const FIELDATA_SPACE: Word = 0o05;

/// Partial word designators
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub enum Partial {
    H1,
    H2,
    Q1,
    Q2,
    Q3,
    Q4,
    S1,
    S2,
    S3,
    S4,
    S5,
    S6
}

impl Partial {
    /// (bit offset of the least significant bit, width)
    pub fn span(&self) -> (usize,usize) {
        match self {
            Self::H1 => (18,18),
            Self::H2 => (0,18),
            Self::Q1 => (27,9),
            Self::Q2 => (18,9),
            Self::Q3 => (9,9),
            Self::Q4 => (0,9),
            Self::S1 => (30,6),
            Self::S2 => (24,6),
            Self::S3 => (18,6),
            Self::S4 => (12,6),
            Self::S5 => (6,6),
            Self::S6 => (0,6)
        }
    }
}

/// Extract `width` bits starting at bit `lsb`
pub fn get_field(w: Word,lsb: usize,width: usize) -> Word {
    debug_assert!(lsb + width <= WORD_BITS);
    (w >> lsb) & ((1 << width) - 1)
}

/// Return `w` with `width` bits starting at bit `lsb` replaced by `val`.
/// Bits of `val` that do not fit are discarded.
pub fn set_field(w: Word,lsb: usize,width: usize,val: Word) -> Word {
    debug_assert!(lsb + width <= WORD_BITS);
    let mask = ((1 << width) - 1) << lsb;
    ((w & !mask) | ((val << lsb) & mask)) & WORD_MASK
}

pub fn get_partial(w: Word,p: Partial) -> Word {
    let (lsb,width) = p.span();
    get_field(w,lsb,width)
}

pub fn set_partial(w: Word,p: Partial,val: Word) -> Word {
    let (lsb,width) = p.span();
    set_field(w,lsb,width,val)
}

pub fn get_bit(w: Word,bit: usize) -> bool {
    (w >> bit) & 1 == 1
}

pub fn set_bit(w: Word,bit: usize,val: bool) -> Word {
    match val {
        true => (w | (1 << bit)) & WORD_MASK,
        false => w & !(1 << bit)
    }
}

/// Build a word from two halves
pub fn from_halves(h1: Word,h2: Word) -> Word {
    ((h1 & H_MASK) << 18) | (h2 & H_MASK)
}

fn fieldata_code(c: char) -> Option<Word> {
    let upper = c.to_ascii_uppercase();
    if !upper.is_ascii() {
        return None;
    }
    FIELDATA.iter().position(|x| *x==upper as u8).map(|p| p as Word)
}

/// Pack a string into `words` Fieldata words, space filled, upper case.
/// Returns None if the string is too long or has a character outside the Fieldata set.
pub fn to_fieldata(s: &str,words: usize) -> Option<Vec<Word>> {
    if s.chars().count() > words*6 {
        return None;
    }
    let mut ans = vec![0;words];
    let mut chars = s.chars();
    for i in 0..words*6 {
        let code = match chars.next() {
            Some(c) => fieldata_code(c)?,
            None => FIELDATA_SPACE
        };
        ans[i/6] |= code << (30 - 6*(i%6));
    }
    Some(ans)
}

/// Unpack Fieldata words, trailing spaces are removed
pub fn from_fieldata(words: &[Word]) -> String {
    let mut ans = String::new();
    for w in words {
        for i in 0..6 {
            let code = get_field(*w,30-6*i,6) as usize;
            ans.push(FIELDATA[code] as char);
        }
    }
    ans.trim_end().to_string()
}

/// Pack ASCII into quarter words, space filled.  Non-ASCII becomes `?`.
pub fn to_ascii_words(s: &str,words: usize) -> Vec<Word> {
    let mut ans = vec![0;words];
    let bytes = s.as_bytes();
    for i in 0..words*4 {
        let b = match bytes.get(i) {
            Some(x) if x.is_ascii() => *x,
            Some(_) => b'?',
            None => b' '
        };
        ans[i/4] |= (b as Word) << (27 - 9*(i%4));
    }
    ans
}

/// Unpack quarter-word ASCII, trailing spaces are removed
pub fn from_ascii_words(words: &[Word]) -> String {
    let mut ans = String::new();
    for w in words {
        for i in 0..4 {
            let b = get_field(*w,27-9*i,9) as u8;
            ans.push(match b {
                x if x>=0x20 && x<0x7f => x as char,
                _ => '.'
            });
        }
    }
    ans.trim_end().to_string()
}

/// Pack 36-bit words into bytes, two words per 9 bytes, big endian.
/// An odd trailing word is padded with a zero word.
pub fn words_to_bytes(words: &[Word]) -> Vec<u8> {
    let mut ans = Vec::with_capacity(words.len()*9/2 + 9);
    for pair in words.chunks(2) {
        let w0 = pair[0] & WORD_MASK;
        let w1 = match pair.get(1) {
            Some(w) => *w & WORD_MASK,
            None => 0
        };
        let combined: u128 = ((w0 as u128) << 36) | w1 as u128;
        let bytes = combined.to_be_bytes();
        ans.extend_from_slice(&bytes[7..16]);
    }
    ans
}

/// Unpack bytes into 36-bit words, two words per 9 bytes.
/// Trailing bytes that do not make up a full pair are ignored.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<Word> {
    let mut ans = Vec::with_capacity(bytes.len()*2/9);
    for chunk in bytes.chunks_exact(9) {
        let mut buf = [0u8;16];
        buf[7..16].copy_from_slice(chunk);
        let combined = u128::from_be_bytes(buf);
        ans.push(((combined >> 36) as Word) & WORD_MASK);
        ans.push((combined as Word) & WORD_MASK);
    }
    ans
}

/// Octal rendering of a word, 12 digits
pub fn octal(w: Word) -> String {
    format!("{:012o}",w & WORD_MASK)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fields() {
        let w = set_field(0,6,18,0o123456);
        assert_eq!(get_field(w,6,18),0o123456);
        assert_eq!(w,0o12345600);
        let w = set_partial(w,Partial::H1,0o777777);
        assert_eq!(get_partial(w,Partial::H1),0o777777);
        assert_eq!(get_partial(w,Partial::H2),0o345600);
        assert_eq!(get_partial(0o010203040506,Partial::S3),0o03);
        assert_eq!(get_partial(0o010203040506,Partial::Q4),0o506);
        assert!(get_bit(set_bit(0,35,true),35));
        assert_eq!(set_bit(WORD_MASK,35,false),0o377777777777);
    }

    #[test]
    fn fieldata() {
        let words = to_fieldata("SYS$",2).unwrap();
        assert_eq!(words[0],0o303630470505);
        assert_eq!(words[1],0o050505050505);
        assert_eq!(from_fieldata(&words),"SYS$");
        assert_eq!(from_fieldata(&to_fieldata("testfile",2).unwrap()),"TESTFILE");
        assert!(to_fieldata("THIRTEENCHARS",2).is_none());
        assert!(to_fieldata("A~B",1).is_none());
    }

    #[test]
    fn ascii() {
        let words = to_ascii_words("VOL1",1);
        assert_eq!(words[0],0o126117114061);
        assert_eq!(from_ascii_words(&to_ascii_words("PACK1",2)),"PACK1");
    }

    #[test]
    fn byte_packing() {
        let words = vec![0o777777777777,0o000000000001,0o123456701234];
        let bytes = words_to_bytes(&words);
        assert_eq!(bytes.len(),18);
        assert_eq!(bytes[0..9],[0xff,0xff,0xff,0xff,0xf0,0x00,0x00,0x00,0x01]);
        let back = bytes_to_words(&bytes);
        assert_eq!(back[0..3],words[..]);
        assert_eq!(back[3],0);
    }
}
