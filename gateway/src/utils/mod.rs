pub mod wav;
pub use wav::{PcmFramer, encode_wav, pcm_to_bytes, streaming_wav_header};
