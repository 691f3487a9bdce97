//! MQ Arithmetic Coder (ISO/IEC 15444-1 Annex C) and the raw bypass coder.
//!
//! The encoder keeps the byte preceding the current codeword at `buf[0]`, so the
//! carry and bit-stuffing rules of BYTEOUT never need a special case. The
//! codeword itself is `buf[1..]`.

use crate::error::{J2kError, Result};

#[derive(Clone, Copy)]
struct MqContextState {
    pub qe: u16,
    pub nmps: u8,
    pub nlps: u8,
    pub switch: u8,
}

const fn st(qe: u16, nmps: u8, nlps: u8, switch: u8) -> MqContextState {
    MqContextState {
        qe,
        nmps,
        nlps,
        switch,
    }
}

// Standard Table C.2
const MQ_TABLE: [MqContextState; 47] = [
    st(0x5601, 1, 1, 1),
    st(0x3401, 2, 6, 0),
    st(0x1801, 3, 9, 0),
    st(0x0AC1, 4, 12, 0),
    st(0x0521, 5, 29, 0),
    st(0x0221, 38, 33, 0),
    st(0x5601, 7, 6, 1),
    st(0x5401, 8, 14, 0),
    st(0x4801, 9, 14, 0),
    st(0x3801, 10, 14, 0),
    st(0x3001, 11, 17, 0),
    st(0x2401, 12, 18, 0),
    st(0x1C01, 13, 20, 0),
    st(0x1601, 29, 21, 0),
    st(0x5601, 15, 14, 1),
    st(0x5401, 16, 14, 0),
    st(0x5101, 17, 15, 0),
    st(0x4801, 18, 16, 0),
    st(0x3801, 19, 17, 0),
    st(0x3401, 20, 18, 0),
    st(0x3001, 21, 19, 0),
    st(0x2801, 22, 19, 0),
    st(0x2401, 23, 20, 0),
    st(0x2201, 24, 21, 0),
    st(0x1C01, 25, 22, 0),
    st(0x1801, 26, 23, 0),
    st(0x1601, 27, 24, 0),
    st(0x1401, 28, 25, 0),
    st(0x1201, 29, 26, 0),
    st(0x1101, 30, 27, 0),
    st(0x0AC1, 31, 28, 0),
    st(0x09C1, 32, 29, 0),
    st(0x08A1, 33, 30, 0),
    st(0x0521, 34, 31, 0),
    st(0x0441, 35, 32, 0),
    st(0x02A1, 36, 33, 0),
    st(0x0221, 37, 34, 0),
    st(0x0141, 38, 35, 0),
    st(0x0111, 39, 36, 0),
    st(0x0085, 40, 37, 0),
    st(0x0049, 41, 38, 0),
    st(0x0025, 42, 39, 0),
    st(0x0015, 43, 40, 0),
    st(0x0009, 44, 41, 0),
    st(0x0005, 45, 42, 0),
    st(0x0001, 45, 43, 0),
    st(0x5601, 46, 46, 0),
];

/// Number of contexts used by the bit-plane coder.
pub const NUM_CONTEXTS: usize = 19;
/// Run-length context.
pub const CTX_RUN_LENGTH: usize = 17;
/// Uniform context (fixed probability state 46).
pub const CTX_UNIFORM: usize = 18;

/// Low bits of the C register left untransmitted by [`Termination::Predict`].
const PREDICT_SPARE_SHIFT: u32 = 7;

/// Probability state and MPS of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextState {
    pub index: u8,
    pub mps: u8,
}

/// Initial context states (Table D.7): the all-zero ZC context starts at 4,
/// run-length at 3, uniform at 46, everything else at 0.
pub fn initial_contexts() -> [ContextState; NUM_CONTEXTS] {
    let mut contexts = [ContextState::default(); NUM_CONTEXTS];
    contexts[0].index = 4;
    contexts[CTX_RUN_LENGTH].index = 3;
    contexts[CTX_UNIFORM].index = 46;
    contexts
}

/// How an MQ codeword is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Termination {
    /// Shortest codeword that still decodes every coded symbol.
    #[default]
    NearOptimal,
    /// Fixed precision termination, cheap to compute.
    Easy,
    /// Transmits the smallest multiple of 2^7 in the final interval, with zero
    /// spare bits, so a decoder can verify the codeword end.
    Predict,
    /// The FLUSH procedure of the standard.
    Full,
}

/// Encoder registers at a pass boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassMark {
    c: u32,
    a: u32,
    ct: u32,
    len: usize,
    last: u8,
}

/// A terminated codeword and the shortest decodable prefix at every mark.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Codeword {
    pub bytes: Vec<u8>,
    pub truncation_lengths: Vec<usize>,
}

pub struct MqEncoder {
    a: u32,
    c: u32,
    ct: u32,
    buf: Vec<u8>,
    contexts: [ContextState; NUM_CONTEXTS],
    termination: Termination,
}

impl MqEncoder {
    pub fn new(termination: Termination) -> Self {
        Self {
            a: 0x8000,
            c: 0,
            ct: 12,
            buf: vec![0],
            contexts: initial_contexts(),
            termination,
        }
    }

    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    /// Bytes emitted so far in the current codeword.
    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode(&mut self, d: u8, cx: usize) {
        let state = &mut self.contexts[cx];
        let entry = MQ_TABLE[state.index as usize];
        let qe = u32::from(entry.qe);
        self.a -= qe;
        if d == state.mps {
            // CODEMPS
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c += qe;
                }
                state.index = entry.nmps;
                self.renormalize();
            } else {
                self.c += qe;
            }
        } else {
            // CODELPS
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            if entry.switch == 1 {
                state.mps = 1 - state.mps;
            }
            state.index = entry.nlps;
            self.renormalize();
        }
    }

    fn renormalize(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    fn byte_out(&mut self) {
        let last = self.buf.len() - 1;
        if self.buf[last] == 0xFF {
            self.buf.push((self.c >> 20) as u8);
            self.c &= 0xF_FFFF;
            self.ct = 7;
        } else if self.c < 0x800_0000 {
            self.buf.push((self.c >> 19) as u8);
            self.c &= 0x7_FFFF;
            self.ct = 8;
        } else {
            // Carry into the pending byte.
            self.buf[last] += 1;
            if self.buf[last] == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.buf.push((self.c >> 20) as u8);
                self.c &= 0xF_FFFF;
                self.ct = 7;
            } else {
                self.buf.push((self.c >> 19) as u8);
                self.c &= 0x7_FFFF;
                self.ct = 8;
            }
        }
    }

    /// Records the coder state at the end of a coding pass.
    pub fn mark(&self) -> PassMark {
        PassMark {
            c: self.c,
            a: self.a,
            ct: self.ct,
            len: self.buf.len(),
            last: self.buf[self.buf.len() - 1],
        }
    }

    /// Terminates the codeword with the configured policy and starts a new one.
    /// Contexts are kept. `marks` are pass boundaries recorded in this codeword.
    pub fn terminate(&mut self, marks: &[PassMark]) -> Codeword {
        match self.termination {
            Termination::Full => self.flush(),
            policy => {
                if let Some((target, j)) = self.codeword_target(policy) {
                    self.emit_target(target, j);
                }
            }
        }
        while self.buf.len() > 1 && self.buf.last() == Some(&0xFF) {
            self.buf.pop();
        }
        let mut lengths = Vec::with_capacity(marks.len());
        let mut floor = 0;
        for mark in marks {
            floor = floor.max(truncation_length(mark, &self.buf) - 1);
            lengths.push(floor);
        }
        let bytes = self.buf[1..].to_vec();
        self.a = 0x8000;
        self.c = 0;
        self.ct = 12;
        self.buf.clear();
        self.buf.push(0);
        Codeword {
            bytes,
            truncation_lengths: lengths,
        }
    }

    // Picks the value T in [C, C + A) to transmit and the bit position j below
    // which T need not be sent. None means no further byte is needed.
    fn codeword_target(&self, policy: Termination) -> Option<(u64, u32)> {
        let c = u64::from(self.c);
        let a = u64::from(self.a);
        let top = 26 - self.ct;
        match policy {
            Termination::NearOptimal => {
                let mask = (1u64 << (27 - self.ct)) - 1;
                if c <= mask && mask < c + a {
                    return None;
                }
                (14..=top).rev().find_map(|j| {
                    let z = (c + a) >> j;
                    let t = (z << j).checked_sub(1)?;
                    (t >= c).then_some((t, j))
                })
            }
            Termination::Easy => {
                let j = top.min(15);
                Some((((c + a) >> j << j) - 1, j))
            }
            Termination::Predict | Termination::Full => {
                let j = PREDICT_SPARE_SHIFT;
                Some((c.div_ceil(1 << j) << j, j))
            }
        }
    }

    fn emit_target(&mut self, target: u64, j: u32) {
        self.c = target as u32;
        let mut remaining = 27 - self.ct as i32 - j as i32;
        while remaining > 0 {
            self.c <<= self.ct;
            self.byte_out();
            remaining -= self.ct as i32;
        }
    }

    // FLUSH procedure, C.2.9.
    fn flush(&mut self) {
        let temp = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= temp {
            self.c -= 0x8000;
        }
        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();
    }
}

// Shortest prefix (counted with the leading placeholder byte) of the final
// codeword `buf` that a decoder padding with 1 bits still decodes up to `mark`.
//
// Values are measured relative to the bytes preceding the pending byte at the
// time of the mark, in units of 2^-SCALE of the C register.
fn truncation_length(mark: &PassMark, buf: &[u8]) -> usize {
    const SCALE: i32 = 64;
    let e = mark.len;
    let w_pending = 27 - mark.ct as i32;
    let upper = ((u128::from(mark.last) << w_pending) + u128::from(mark.c) + u128::from(mark.a)) << SCALE;

    let weight_step = |byte: u8| if byte == 0xFF { 7 } else { 8 };

    if e >= 2 && e - 1 < buf.len() {
        // Drop the pending byte altogether: the tail of ones sits right below
        // the previous byte.
        let w_prev = w_pending + weight_step(buf[e - 2]);
        if (1u128 << (w_prev + SCALE)) <= upper {
            return e - 1;
        }
    }

    let mut sum = 0u128;
    let mut w = w_pending;
    let mut len = e - 1;
    while len < buf.len() {
        if w + SCALE < 0 {
            return buf.len();
        }
        sum += u128::from(buf[len]) << (w + SCALE);
        len += 1;
        if sum + (1u128 << (w + SCALE)) <= upper {
            return len;
        }
        w -= weight_step(buf[len - 1]);
    }
    buf.len()
}

pub struct MqDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    a: u32,
    c: u32,
    ct: u32,
    /// Bits shifted into `c` since the codeword start, padding included.
    bits_read: usize,
    contexts: [ContextState; NUM_CONTEXTS],
}

impl<'a> MqDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            pos: 0,
            a: 0x8000,
            c: 0,
            ct: 0,
            bits_read: 0,
            contexts: initial_contexts(),
        };
        decoder.init();
        decoder
    }

    /// Starts decoding a new codeword, keeping the context states.
    pub fn restart(&mut self, data: &'a [u8]) {
        self.data = data;
        self.init();
    }

    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    // INITDEC, C.3.5
    fn init(&mut self) {
        self.pos = 0;
        self.c = u32::from(self.byte(0)) << 16;
        self.bits_read = 8;
        self.byte_in();
        self.c <<= 7;
        self.ct -= 7;
        self.a = 0x8000;
    }

    // Bytes past the end of the codeword read as 0xFF.
    #[inline]
    fn byte(&self, i: usize) -> u8 {
        self.data.get(i).copied().unwrap_or(0xFF)
    }

    // BYTEIN, C.3.4
    fn byte_in(&mut self) {
        if self.byte(self.pos) == 0xFF {
            if self.byte(self.pos + 1) > 0x8F {
                self.c += 0xFF00;
                self.ct = 8;
            } else {
                self.pos += 1;
                self.c += u32::from(self.byte(self.pos)) << 9;
                self.ct = 7;
            }
        } else {
            self.pos += 1;
            self.c += u32::from(self.byte(self.pos)) << 8;
            self.ct = 8;
        }
        self.bits_read += self.ct as usize;
    }

    pub fn decode(&mut self, cx: usize) -> u8 {
        let state = &mut self.contexts[cx];
        let entry = MQ_TABLE[state.index as usize];
        let qe = u32::from(entry.qe);
        self.a -= qe;
        let d;
        if (self.c >> 16) < qe {
            // LPS exchange
            if self.a < qe {
                d = state.mps;
                state.index = entry.nmps;
            } else {
                d = 1 - state.mps;
                if entry.switch == 1 {
                    state.mps = 1 - state.mps;
                }
                state.index = entry.nlps;
            }
            self.a = qe;
            self.renormalize();
        } else {
            self.c -= qe << 16;
            if self.a & 0x8000 == 0 {
                // MPS exchange
                if self.a < qe {
                    d = 1 - state.mps;
                    if entry.switch == 1 {
                        state.mps = 1 - state.mps;
                    }
                    state.index = entry.nlps;
                } else {
                    d = state.mps;
                    state.index = entry.nmps;
                }
                self.renormalize();
            } else {
                d = state.mps;
            }
        }
        d
    }

    fn renormalize(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// Checks the end of a codeword terminated with [`Termination::Predict`],
    /// once its last symbol has been decoded.
    ///
    /// `c` then holds the transmitted value minus the interval base, followed by
    /// the 1 bits padding the codeword. With the codeword end located in the
    /// register, the padding is removed exactly and what remains must be a
    /// whole number of C units below 2^7. The spare bits of the last byte
    /// must be zero.
    pub fn check_predictable_termination(&self) -> Result<()> {
        let mismatch = Err(J2kError::TerminationMismatch(
            "predictable termination does not match the decoder state",
        ));
        let len = self.data.len();
        if len > 0 && self.pos + 1 < len {
            return mismatch;
        }
        let stuffed = self.data[..len.saturating_sub(1)].iter().filter(|&&b| b == 0xFF).count();
        let codeword_bits = (8 * len - stuffed) as i64;
        let lowest_read = 16 - i64::from(self.ct);
        // Register position of the least significant codeword bit.
        let end = lowest_read + self.bits_read as i64 - codeword_bits;
        let top = 16 + i64::from(PREDICT_SPARE_SHIFT);
        // At most 7 spare bits, and none once trailing 0xFF bytes were dropped.
        if end < 16 {
            return mismatch;
        }
        let spare = top - end;
        if spare > 0 && self.data.last().is_some_and(|&b| b & ((1u8 << spare) - 1) != 0) {
            return mismatch;
        }
        let padding = (1i64 << end.min(top)) - (1i64 << lowest_read);
        let offset = i64::from(self.c) - padding;
        if offset < 0 || offset >= 1 << top || offset & 0xFFFF != 0 {
            return mismatch;
        }
        Ok(())
    }
}

/// Raw (bypass) bit writer with the stuffing rule of D.6: a byte following
/// 0xFF carries only 7 bits.
#[derive(Debug, Clone, Default)]
pub struct RawEncoder {
    buf: Vec<u8>,
    acc: u8,
    free: u32,
    capacity: u32,
}

impl RawEncoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            acc: 0,
            free: 8,
            capacity: 8,
        }
    }

    pub fn put_bit(&mut self, bit: u8) {
        self.acc = (self.acc << 1) | (bit & 1);
        self.free -= 1;
        if self.free == 0 {
            let byte = self.acc;
            self.buf.push(byte);
            self.acc = 0;
            self.capacity = if byte == 0xFF { 7 } else { 8 };
            self.free = self.capacity;
        }
    }

    /// Bytes a decoder needs to read every bit written so far.
    pub fn len(&self) -> usize {
        self.buf.len() + usize::from(self.free < self.capacity)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pads the last byte with alternating 0 and 1 bits and returns the segment.
    pub fn terminate(&mut self) -> Vec<u8> {
        let mut pad = 0;
        while self.free < self.capacity {
            self.put_bit(pad);
            pad ^= 1;
        }
        let mut bytes = std::mem::take(&mut self.buf);
        if bytes.last() == Some(&0xFF) {
            bytes.pop();
        }
        *self = Self::new();
        bytes
    }
}

pub struct RawDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    cur: u8,
    left: u32,
    prev_ff: bool,
}

impl<'a> RawDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            cur: 0,
            left: 0,
            prev_ff: false,
        }
    }

    pub fn read_bit(&mut self) -> u8 {
        if self.left == 0 {
            let byte = self.data.get(self.pos).copied().unwrap_or(0xFF);
            self.pos += 1;
            self.left = if self.prev_ff { 7 } else { 8 };
            self.prev_ff = byte == 0xFF;
            self.cur = byte;
        }
        self.left -= 1;
        (self.cur >> self.left) & 1
    }
}
