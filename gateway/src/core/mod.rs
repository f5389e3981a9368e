pub mod chunker;
pub mod codec;
pub mod hardware;
pub mod inference;
pub mod pipeline;
pub mod stitcher;
pub mod synthesizer;
pub mod tokens;
pub mod windower;

// Re-export commonly used types for convenience
pub use chunker::{Chunk, DEFAULT_MAX_CHUNK_CHARS, TextChunker};
pub use codec::{AudioCodec, CodecConfig, CodecError, CodecResult, RemoteCodec};
pub use hardware::{
    AcceleratorInfo, HardwareProbe, HardwareProfile, HardwareTier, IoMode, NoAcceleratorProbe,
    NvidiaSmiProbe, ProbeKind, hardware_profile, init_hardware_profile,
};
pub use inference::{
    InferenceClient, InferenceConfig, InferenceError, InferenceResult, REPETITION_PENALTY,
    SamplingParams, TokenRequest, TokenSource, TokenStream,
};
pub use pipeline::{PcmChunk, PipelineConfig, SpeechPipeline, SynthesisOutput, SynthesisStream};
pub use stitcher::{SegmentStitcher, StreamingStitcher};
pub use synthesizer::{AudioSegment, DecodePool, ParallelSynthesizer, ReorderBuffer};
pub use tokens::{Frame, Token, Window};
pub use windower::Windower;
