//! Audio token data model.
//!
//! The language model emits integer ids from the codec vocabulary. Seven consecutive
//! ids form a [`Frame`], the atomic unit the codec accepts, and seven frames form a
//! [`Window`], the unit submitted to the codec in one decode call.

use std::fmt;

/// Number of tokens in one frame
pub const TOKENS_PER_FRAME: usize = 7;

/// Number of frames in one full decode window
pub const FRAMES_PER_WINDOW: usize = 7;

/// Number of tokens in one full decode window (49)
pub const TOKENS_PER_WINDOW: usize = TOKENS_PER_FRAME * FRAMES_PER_WINDOW;

/// Size of the per-position codec vocabulary; valid ids are `0..CODEBOOK_SIZE`
pub const CODEBOOK_SIZE: u32 = 4096;

/// A single codec token id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(u32);

impl Token {
    /// Create a token, returning `None` when the id is outside the codec vocabulary.
    pub fn new(id: u32) -> Option<Self> {
        (id < CODEBOOK_SIZE).then_some(Self(id))
    }

    /// Create a token from a signed id as computed from a model marker.
    pub fn from_signed(id: i64) -> Option<Self> {
        u32::try_from(id).ok().and_then(Self::new)
    }

    pub fn id(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exactly seven consecutive tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([Token; TOKENS_PER_FRAME]);

impl Frame {
    pub fn new(tokens: [Token; TOKENS_PER_FRAME]) -> Self {
        Self(tokens)
    }

    /// Build a frame from a slice of exactly seven tokens.
    pub fn from_slice(tokens: &[Token]) -> Option<Self> {
        <[Token; TOKENS_PER_FRAME]>::try_from(tokens).ok().map(Self)
    }

    pub fn tokens(&self) -> &[Token; TOKENS_PER_FRAME] {
        &self.0
    }
}

/// A decode window: up to seven frames plus its position within the chunk.
///
/// Every window except possibly the last one of a chunk holds exactly
/// [`FRAMES_PER_WINDOW`] frames. Windows are always frame-aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    index: usize,
    frames: Vec<Frame>,
}

impl Window {
    /// Create a window. Returns `None` for an empty frame list or more than
    /// [`FRAMES_PER_WINDOW`] frames.
    pub fn new(index: usize, frames: Vec<Frame>) -> Option<Self> {
        if frames.is_empty() || frames.len() > FRAMES_PER_WINDOW {
            return None;
        }
        Some(Self { index, frames })
    }

    /// Position of this window within its chunk
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn token_count(&self) -> usize {
        self.frames.len() * TOKENS_PER_FRAME
    }

    /// True when the window holds fewer than seven frames
    pub fn is_partial(&self) -> bool {
        self.frames.len() < FRAMES_PER_WINDOW
    }

    /// Tokens of the window in arrival order
    pub fn tokens(&self) -> impl Iterator<Item = Token> + '_ {
        self.frames.iter().flat_map(|frame| frame.tokens().iter().copied())
    }

    /// Token ids flattened for the codec wire format
    pub fn codes(&self) -> Vec<u32> {
        self.tokens().map(Token::id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(start: u32) -> Frame {
        let tokens: Vec<Token> = (start..start + 7).map(|id| Token::new(id).unwrap()).collect();
        Frame::from_slice(&tokens).unwrap()
    }

    #[test]
    fn test_token_range() {
        assert!(Token::new(0).is_some());
        assert!(Token::new(CODEBOOK_SIZE - 1).is_some());
        assert!(Token::new(CODEBOOK_SIZE).is_none());
        assert!(Token::from_signed(-1).is_none());
        assert_eq!(Token::from_signed(42).map(Token::id), Some(42));
    }

    #[test]
    fn test_frame_requires_seven_tokens() {
        let tokens: Vec<Token> = (0..6).map(|id| Token::new(id).unwrap()).collect();
        assert!(Frame::from_slice(&tokens).is_none());
    }

    #[test]
    fn test_window_bounds() {
        assert!(Window::new(0, Vec::new()).is_none());
        assert!(Window::new(0, (0..8).map(|i| frame(i * 7)).collect()).is_none());

        let full = Window::new(3, (0..7).map(|i| frame(i * 7)).collect()).unwrap();
        assert_eq!(full.index(), 3);
        assert_eq!(full.token_count(), TOKENS_PER_WINDOW);
        assert!(!full.is_partial());
        assert_eq!(full.codes(), (0..49).collect::<Vec<u32>>());

        let partial = Window::new(4, vec![frame(0), frame(7)]).unwrap();
        assert!(partial.is_partial());
        assert_eq!(partial.token_count(), 14);
    }
}
