//! AArch64 instruction matching over resident kernel text.
//!
//! The resolver never disassembles in full. It tests each 32-bit word
//! against a `mask`/`value` pair and, on a match, pulls the immediate out
//! using the addressing mode of that instruction class.
//!
//! Key responsibilities:
//! - Define the instruction patterns the resolver looks for.
//! - Decode unsigned-offset, add-immediate and ADRP immediates.
//! - Provide [`scan`], the single range-checked search primitive.

use core::ops::RangeInclusive;

/// How the immediate of a matched word is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Imm {
    /// No immediate of interest (branches, logical ops).
    None,
    /// `imm12` scaled by the access size in bytes (`1 << shift`).
    Scaled(u32),
    /// `add` immediate, optionally shifted left by 12 (bit 22).
    Add,
    /// Page address formed by `adrp` relative to the word's own address.
    Adrp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub mask: u32,
    pub value: u32,
    pub imm: Imm,
}

impl Pattern {
    pub const fn new(mask: u32, value: u32, imm: Imm) -> Self {
        Self { mask, value, imm }
    }

    #[inline]
    pub const fn matches(&self, word: u32) -> bool {
        word & self.mask == self.value
    }
}

/*────────── fixed words ─────────*/

pub const RET: u32 = 0xD65F_03C0;
pub const MOV_X29_SP: u32 = 0x9100_03FD;

/*────────── loads & stores (unsigned offset) ─────────*/

pub const STRB: Pattern = Pattern::new(0xFFC0_0000, 0x3900_0000, Imm::Scaled(0));
pub const LDR_32: Pattern = Pattern::new(0xFFC0_0000, 0xB940_0000, Imm::Scaled(2));
pub const LDR_64: Pattern = Pattern::new(0xFFC0_0000, 0xF940_0000, Imm::Scaled(3));
pub const STR_32: Pattern = Pattern::new(0xFFC0_0000, 0xB900_0000, Imm::Scaled(2));
pub const STR_64: Pattern = Pattern::new(0xFFC0_0000, 0xF900_0000, Imm::Scaled(3));
/// `ldr xT, [x0, #imm]`
pub const LDR_64_X0: Pattern = Pattern::new(0xFFC0_03E0, 0xF940_0000, Imm::Scaled(3));
/// `str wT, [x0, #imm]`
pub const STR_32_X0: Pattern = Pattern::new(0xFFC0_03E0, 0xB900_0000, Imm::Scaled(2));

/*────────── arithmetic & logic ─────────*/

pub const ADD_64: Pattern = Pattern::new(0xFF80_0000, 0x9100_0000, Imm::Add);
/// `add x0, x19, #imm`
pub const ADD_X0_X19: Pattern = Pattern::new(0xFF80_03FF, 0x9100_0260, Imm::Add);
/// `orr wD, wN, wM{, shift}`
pub const ORR: Pattern = Pattern::new(0xFF20_0000, 0x2A00_0000, Imm::None);
/// `and xD, xN, #0xfffffffffffffff8`
pub const AND_NOT_7: Pattern = Pattern::new(0xFFFF_FC00, 0x927D_F000, Imm::None);
pub const ADRP: Pattern = Pattern::new(0x9F00_0000, 0x9000_0000, Imm::Adrp);

/*────────── branches ─────────*/

pub const BL: Pattern = Pattern::new(0xFC00_0000, 0x9400_0000, Imm::None);
pub const CBZ: Pattern = Pattern::new(0x7F00_0000, 0x3400_0000, Imm::None);
pub const TBNZ: Pattern = Pattern::new(0x7F00_0000, 0x3700_0000, Imm::None);

/*────────── parameter register use (release-shape probe) ─────────*/

/// `str wzr/w4, [xN, #imm]` with Rt = 4 (32 or 64 bit).
pub const STR_RT_4: Pattern = Pattern::new(0xBFC0_001F, 0xB900_0004, Imm::None);
/// `mov wD, w4`
pub const MOV_RM_4: Pattern = Pattern::new(0x7FFF_FFE0, 0x2A04_03E0, Imm::None);
/// `uxtb wD, w4`
pub const UXTB_RN_4: Pattern = Pattern::new(0xFFFF_FFE0, 0x5300_1C80, Imm::None);
pub const STR_RT_3: Pattern = Pattern::new(0xBFC0_001F, 0xB900_0003, Imm::None);
pub const MOV_RM_3: Pattern = Pattern::new(0x7FFF_FFE0, 0x2A03_03E0, Imm::None);
pub const UXTB_RN_3: Pattern = Pattern::new(0xFFFF_FFE0, 0x5300_1C60, Imm::None);

#[inline]
const fn bits(word: u32, hi: u32, lo: u32) -> u64 {
    ((word >> lo) & ((1u32 << (hi - lo + 1)) - 1)) as u64
}

#[inline]
const fn sign_extend(value: u64, width: u32) -> u64 {
    let shift = 64 - width;
    (((value << shift) as i64) >> shift) as u64
}

/// Decode the immediate of `word` according to `imm`. `pc` is the address
/// of the word and only matters for ADRP.
pub fn decode_imm(word: u32, imm: Imm, pc: u64) -> u64 {
    let imm12 = bits(word, 21, 10);
    match imm {
        Imm::None => 0,
        Imm::Scaled(shift) => imm12 << shift,
        Imm::Add => {
            if bits(word, 22, 22) == 1 {
                imm12 << 12
            } else {
                imm12
            }
        }
        Imm::Adrp => {
            let immlo = bits(word, 30, 29);
            let immhi = bits(word, 23, 5);
            let rel = sign_extend((immhi << 14) | (immlo << 12), 33);
            pc.wrapping_add(rel) & !0xFFF
        }
    }
}

/// A pattern hit inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    /// Word index within the window.
    pub index: usize,
    /// Decoded immediate (byte displacement).
    pub imm: u64,
}

/// Find the first word matching `pattern` whose immediate lies in `range`.
///
/// Scanning stops at the first `ret`. Words matching the pattern with an
/// out-of-range immediate are skipped.
pub fn scan(window: &[u32], pattern: &Pattern, range: RangeInclusive<u64>) -> Option<Match> {
    scan_from(window, 0, pattern, range)
}

/// [`scan`] starting at word `start`.
pub fn scan_from(
    window: &[u32],
    start: usize,
    pattern: &Pattern,
    range: RangeInclusive<u64>,
) -> Option<Match> {
    for (index, &word) in window.iter().enumerate().skip(start) {
        if word == RET {
            return None;
        }
        if !pattern.matches(word) {
            continue;
        }
        let imm = decode_imm(word, pattern.imm, 0);
        if range.contains(&imm) {
            return Some(Match { index, imm });
        }
    }
    None
}

/// True if `window[index]` exists and matches any of `patterns`.
#[inline]
pub fn matches_at(window: &[u32], index: usize, patterns: &[Pattern]) -> bool {
    window
        .get(index)
        .is_some_and(|&w| patterns.iter().any(|p| p.matches(w)))
}
