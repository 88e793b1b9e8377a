//! Application configuration.
//!
//! [`Config::default`] mirrors the stock setup: a full hand landmark model on the GPU delegate,
//! up to two hands, refreshing at 60 Hz. [`Config::from_env`] applies overrides from these
//! environment variables:
//!
//! * `HANDVIEW_MODEL`: path to the hand landmark `.onnx` model.
//! * `HANDVIEW_PALM_MODEL`: path to the palm detection `.onnx` model.
//! * `HANDVIEW_DELEGATE`: `gpu` or `cpu`.
//! * `HANDVIEW_NUM_HANDS`: maximum number of hands to report (at least 1).
//! * `HANDVIEW_DISPLAY_FPS`: display refresh rate the frame loop is paced to.
//! * `HANDVIEW_CAMERA_RETRIES`: how many times to try opening the camera.
//!
//! The webcam device is picked through `HANDVIEW_WEBCAM_NAME`, which is read when the camera is
//! opened (see [`crate::video::webcam`]).

use std::{
    env::{self, VarError},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use crate::detector::{BaseOptions, Delegate, DetectorOptions, RunningMode};

const ENV_VAR_MODEL: &str = "HANDVIEW_MODEL";
const ENV_VAR_PALM_MODEL: &str = "HANDVIEW_PALM_MODEL";
const ENV_VAR_DELEGATE: &str = "HANDVIEW_DELEGATE";
const ENV_VAR_NUM_HANDS: &str = "HANDVIEW_NUM_HANDS";
const ENV_VAR_DISPLAY_FPS: &str = "HANDVIEW_DISPLAY_FPS";
const ENV_VAR_CAMERA_RETRIES: &str = "HANDVIEW_CAMERA_RETRIES";

/// Location of the hand landmark model, relative to the working directory.
pub const DEFAULT_MODEL_PATH: &str = "models/hand_landmark_full.onnx";

/// Location of the palm detection model, relative to the working directory.
pub const DEFAULT_PALM_MODEL_PATH: &str = "models/palm_detection_full.onnx";

/// An invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value set for `{var}` variable: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("`{var}` variable is not valid unicode")]
    NotUnicode { var: &'static str },
}

/// Settings for all components of the application.
#[derive(Debug, Clone)]
pub struct Config {
    pub model_path: PathBuf,
    pub palm_model_path: PathBuf,
    pub delegate: Delegate,
    pub num_hands: u32,
    /// Refresh rate the frame loop is paced to.
    pub display_fps: u32,
    /// Attempts at loading the model before giving up.
    pub model_attempts: u32,
    /// Attempts at opening the camera before giving up.
    pub camera_attempts: u32,
    /// Delay between two attempts.
    pub retry_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            palm_model_path: PathBuf::from(DEFAULT_PALM_MODEL_PATH),
            delegate: Delegate::Gpu,
            num_hands: 2,
            display_fps: 60,
            model_attempts: 1,
            camera_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Creates the default configuration with overrides from the environment applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var))
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&'static str) -> Result<String, VarError>,
    {
        let mut config = Self::default();
        let mut get = |var: &'static str| match lookup(var) {
            Ok(value) => Ok(Some(value)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode { var }),
        };

        if let Some(path) = get(ENV_VAR_MODEL)? {
            config.model_path = PathBuf::from(path);
        }
        if let Some(path) = get(ENV_VAR_PALM_MODEL)? {
            config.palm_model_path = PathBuf::from(path);
        }
        if let Some(delegate) = get(ENV_VAR_DELEGATE)? {
            config.delegate = parse(ENV_VAR_DELEGATE, &delegate)?;
        }
        if let Some(num_hands) = get(ENV_VAR_NUM_HANDS)? {
            config.num_hands = parse_nonzero(ENV_VAR_NUM_HANDS, &num_hands)?;
        }
        if let Some(fps) = get(ENV_VAR_DISPLAY_FPS)? {
            config.display_fps = parse_nonzero(ENV_VAR_DISPLAY_FPS, &fps)?;
        }
        if let Some(attempts) = get(ENV_VAR_CAMERA_RETRIES)? {
            config.camera_attempts = parse_nonzero(ENV_VAR_CAMERA_RETRIES, &attempts)?;
        }

        log::debug!("configuration: {config:?}");
        Ok(config)
    }

    /// Options for the hand landmark session.
    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            base_options: BaseOptions {
                model_asset_path: self.model_path.clone(),
                palm_model_asset_path: self.palm_model_path.clone(),
                delegate: self.delegate,
            },
            running_mode: RunningMode::Video,
            num_hands: self.num_hands,
        }
    }
}

fn parse<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_nonzero(var: &'static str, value: &str) -> Result<u32, ConfigError> {
    match parse::<u32>(var, value)? {
        0 => Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be at least 1".into(),
        }),
        n => Ok(n),
    }
}
