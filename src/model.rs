use std::path::PathBuf;

use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::{VarBuilder, ops::log_softmax};
use candle_transformers::models::blip;
use hf_hub::{Repo, RepoType, api::sync::Api};
use kornia_image::{Image, allocator::CpuAllocator};
use kornia_imgproc::{interpolation::InterpolationMode, resize::resize_fast};
use tokenizers::Tokenizer;

use crate::{error::ModelLoadError, source::DecodedImage};

/// Black-box captioning capability: encode an image, score the next token, decode tokens.
///
/// Implementations own their weights and device. The generator only talks to the model
/// through this trait, so the decoding strategy stays independent of the runtime.
pub trait CaptionModel {
    /// Model-ready representation of one image.
    type Encoded;
    /// The error type that can be returned during inference.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Converts a decoded image into the representation consumed by the text decoder.
    fn encode(&mut self, image: &DecodedImage) -> Result<Self::Encoded, Self::Error>;

    /// Returns the log-probabilities over the vocabulary for the token following `tokens`.
    fn next_token_logprobs(
        &mut self,
        encoded: &Self::Encoded,
        tokens: &[u32],
    ) -> Result<Vec<f32>, Self::Error>;

    /// Converts a token sequence back to text.
    fn decode(&self, tokens: &[u32]) -> Result<String, Self::Error>;

    /// Token every sequence starts with.
    fn bos_token_id(&self) -> u32;

    /// Token that ends a sequence.
    fn eos_token_id(&self) -> u32;

    /// Name of the device the weights live on.
    fn device_name(&self) -> &str;
}

#[derive(thiserror::Error, Debug)]
pub enum BlipError {
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    #[error(transparent)]
    ImageError(#[from] kornia_image::ImageError),

    #[error(transparent)]
    TokenizerError(#[from] tokenizers::Error),
}

/// Configuration for loading the BLIP captioning model
#[derive(Clone, Debug)]
pub struct ModelConfig {
    /// Hugging Face model id.
    pub model_id: String,
    /// Revision holding the safetensors weights.
    pub revision: String,
    /// Local weights, skips the hub download when set.
    pub weights: Option<PathBuf>,
    /// Local tokenizer.json, skips the hub download when set.
    pub tokenizer: Option<PathBuf>,
    /// Stay on the cpu even if an accelerator is available.
    pub force_cpu: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "Salesforce/blip-image-captioning-large".to_string(),
            revision: "refs/pr/18".to_string(),
            weights: None,
            tokenizer: None,
            force_cpu: false,
        }
    }
}

/// Picks the fastest available device: cuda, then metal, then cpu.
///
/// A failure to open an accelerator falls back to the cpu with a warning.
pub fn select_device(force_cpu: bool) -> Device {
    if force_cpu {
        return Device::Cpu;
    }

    if candle_core::utils::cuda_is_available() {
        match Device::new_cuda(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("CUDA not available, defaulting to CPU: {e}"),
        }
    } else if candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("Metal not available, defaulting to CPU: {e}"),
        }
    }

    Device::Cpu
}

fn device_label(device: &Device) -> &'static str {
    if device.is_cuda() {
        "cuda"
    } else if device.is_metal() {
        "metal"
    } else {
        "cpu"
    }
}

/// The BLIP image captioning model
///
/// Holds the vision encoder, the text decoder and the tokenizer, bound to one device for
/// the whole session.
///
/// NOTE: to run the model with Cuda, you need to pass the `--features cuda` flag to the `cargo run` command.
pub struct BlipModel {
    model: blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
    device: Device,
    img_buf: Image<u8, 3, CpuAllocator>,
    mean: Tensor,
    std: Tensor,
}

impl BlipModel {
    // taken from the BLIP processor config
    const IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
    const IMAGE_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

    const IMAGE_SIZE: usize = 384;

    // [DEC] and [SEP] in the BLIP bert tokenizer
    const BOS_TOKEN_ID: u32 = 30522;
    const EOS_TOKEN_ID: u32 = 102;

    /// Loads the weights and tokenizer and binds them to the selected device.
    ///
    /// Downloads from the hub unless local paths are given in the config. There is no
    /// retry: a failure here ends the session.
    pub fn load(config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let device = select_device(config.force_cpu);

        let api = Api::new()?;

        let weights = match &config.weights {
            Some(path) => path.clone(),
            None => api
                .repo(Repo::with_revision(
                    config.model_id.clone(),
                    RepoType::Model,
                    config.revision.clone(),
                ))
                .get("model.safetensors")?,
        };

        let tokenizer = match &config.tokenizer {
            Some(path) => path.clone(),
            None => api.model(config.model_id.clone()).get("tokenizer.json")?,
        };

        log::debug!("Loading weights from {}", weights.display());

        let tokenizer = Tokenizer::from_file(tokenizer)?;

        let blip_config = blip::Config::image_captioning_large();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let model = blip::BlipForConditionalGeneration::new(&blip_config, vb)?;

        let img_buf = Image::from_size_val(
            [Self::IMAGE_SIZE, Self::IMAGE_SIZE].into(),
            0,
            CpuAllocator,
        )?;
        let mean = Tensor::new(&Self::IMAGE_MEAN, &device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&Self::IMAGE_STD, &device)?.reshape((3, 1, 1))?;

        log::info!("Model {} loaded on: {}", config.model_id, device_label(&device));

        Ok(Self {
            model,
            tokenizer,
            device,
            img_buf,
            mean,
            std,
        })
    }

    // resize, normalize and convert to a tensor with shape [1, 3, 384, 384]
    fn preprocess(&mut self, image: &DecodedImage) -> Result<Tensor, BlipError> {
        resize_fast(image, &mut self.img_buf, InterpolationMode::Bilinear)?;

        let image_t = Tensor::from_raw_buffer(
            self.img_buf.as_slice(),
            DType::U8,
            &[self.img_buf.rows(), self.img_buf.cols(), 3],
            &self.device,
        )?
        .to_dtype(DType::F32)?
        .permute((2, 0, 1))?
        .affine(1. / 255., 0.)?
        .broadcast_sub(&self.mean)?
        .broadcast_div(&self.std)?
        .unsqueeze(0)?;

        Ok(image_t)
    }
}

impl CaptionModel for BlipModel {
    type Encoded = Tensor;
    type Error = BlipError;

    fn encode(&mut self, image: &DecodedImage) -> Result<Tensor, BlipError> {
        let pixel_values = self.preprocess(image)?;
        let image_embeds = self.model.vision_model().forward(&pixel_values)?;
        Ok(image_embeds)
    }

    fn next_token_logprobs(
        &mut self,
        encoded: &Tensor,
        tokens: &[u32],
    ) -> Result<Vec<f32>, BlipError> {
        // every beam carries its own prefix, so the decoder cache cannot be shared
        self.model.reset_kv_cache();

        let input_ids = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        let logits = self.model.text_decoder().forward(&input_ids, encoded)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;

        let logprobs = log_softmax(&logits, D::Minus1)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        Ok(logprobs)
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BlipError> {
        Ok(self.tokenizer.decode(tokens, true)?)
    }

    fn bos_token_id(&self) -> u32 {
        Self::BOS_TOKEN_ID
    }

    fn eos_token_id(&self) -> u32 {
        Self::EOS_TOKEN_ID
    }

    fn device_name(&self) -> &str {
        device_label(&self.device)
    }
}
