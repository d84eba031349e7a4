//! ComfyUI API-format workflow templates.
//!
//! Each function is a pure mapping from bound parameters to the node graph
//! submitted to `POST /prompt`. Node ids are fixed so tests and operators can
//! address them (`"3"` is always the sampler, `"9"` the image saver).

use serde_json::json;

/// Checkpoint loaded by every template.
pub const CHECKPOINT: &str = "v1-5-pruned-emaonly.safetensors";

/// Filename prefix for images written by the `SaveImage` node.
pub const OUTPUT_PREFIX: &str = "relay";

/// Denoise strength for image-to-image.
pub const IMG2IMG_DENOISE: f64 = 0.75;

/// Text-to-image: empty latent, sampled from the prompt.
pub fn text2img(text: &str, negative_text: &str, seed: u64) -> serde_json::Value {
    json!({
        "3": sampler(seed, 1.0),
        "4": checkpoint_loader(),
        "5": {
            "class_type": "EmptyLatentImage",
            "inputs": { "width": 512, "height": 512, "batch_size": 1 }
        },
        "6": clip_encode(text),
        "7": clip_encode(negative_text),
        "8": vae_decode(),
        "9": save_image(),
    })
}

/// Image-to-image: the pushed input image is VAE-encoded into the latent.
///
/// `input_path` is relative to the backend's input directory.
pub fn img2img(text: &str, negative_text: &str, input_path: &str, seed: u64) -> serde_json::Value {
    json!({
        "3": sampler(seed, IMG2IMG_DENOISE),
        "4": checkpoint_loader(),
        "5": {
            "class_type": "VAEEncode",
            "inputs": { "pixels": ["10", 0], "vae": ["4", 2] }
        },
        "6": clip_encode(text),
        "7": clip_encode(negative_text),
        "8": vae_decode(),
        "9": save_image(),
        "10": {
            "class_type": "LoadImage",
            "inputs": { "image": input_path, "upload": "image" }
        },
    })
}

fn sampler(seed: u64, denoise: f64) -> serde_json::Value {
    json!({
        "class_type": "KSampler",
        "inputs": {
            "seed": seed,
            "steps": 20,
            "cfg": 8,
            "sampler_name": "euler",
            "scheduler": "normal",
            "denoise": denoise,
            "model": ["4", 0],
            "positive": ["6", 0],
            "negative": ["7", 0],
            "latent_image": ["5", 0]
        }
    })
}

fn checkpoint_loader() -> serde_json::Value {
    json!({
        "class_type": "CheckpointLoaderSimple",
        "inputs": { "ckpt_name": CHECKPOINT }
    })
}

fn clip_encode(text: &str) -> serde_json::Value {
    json!({
        "class_type": "CLIPTextEncode",
        "inputs": { "text": text, "clip": ["4", 1] }
    })
}

fn vae_decode() -> serde_json::Value {
    json!({
        "class_type": "VAEDecode",
        "inputs": { "samples": ["3", 0], "vae": ["4", 2] }
    })
}

fn save_image() -> serde_json::Value {
    json!({
        "class_type": "SaveImage",
        "inputs": { "filename_prefix": OUTPUT_PREFIX, "images": ["8", 0] }
    })
}
