use std::env::{self, VarError};

use anyhow::bail;
use image::ImageBuffer;
use once_cell::sync::Lazy;

use super::Image;

const ENV_VAR_JPEG_BACKEND: &str = "HANDVIEW_JPEG_BACKEND";

/// Webcams deliver MJPG, so JPEG decoding is on the hot path; the backend is selectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JpegBackend {
    /// Uses the `jpeg-decoder` crate (through `image`), a robust but slow pure-Rust decoder.
    JpegDecoder,
    /// Uses the `zune-jpeg` crate, a pure-Rust JPEG decoder somewhat faster than `jpeg-decoder`.
    ZuneJpeg,
}

const DEFAULT_BACKEND: JpegBackend = JpegBackend::ZuneJpeg;

static JPEG_BACKEND: Lazy<JpegBackend> = Lazy::new(|| {
    let backend = match parse_backend(env::var(ENV_VAR_JPEG_BACKEND)) {
        Ok(backend) => backend,
        Err(invalid) => {
            log::warn!(
                "invalid value set for `{ENV_VAR_JPEG_BACKEND}` variable: {invalid}; \
                 using {DEFAULT_BACKEND:?}"
            );
            DEFAULT_BACKEND
        }
    };
    log::debug!("using JPEG decode backend: {:?}", backend);
    backend
});

fn parse_backend(var: Result<String, VarError>) -> Result<JpegBackend, String> {
    match var.as_deref() {
        Ok("zune-jpeg") => Ok(JpegBackend::ZuneJpeg),
        Ok("jpeg-decoder") => Ok(JpegBackend::JpegDecoder),
        Err(VarError::NotPresent) => Ok(DEFAULT_BACKEND),
        Ok(invalid) => Err(format!("'{invalid}'")),
        Err(VarError::NotUnicode(s)) => Err(s.to_string_lossy().into_owned()),
    }
}

pub(super) fn decode_jpeg(data: &[u8]) -> anyhow::Result<Image> {
    let buf = match *JPEG_BACKEND {
        JpegBackend::JpegDecoder => {
            image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)?.to_rgba8()
        }
        JpegBackend::ZuneJpeg => {
            use zune_jpeg::zune_core::colorspace::ColorSpace;
            use zune_jpeg::zune_core::options::DecoderOptions;

            let mut decomp = zune_jpeg::JpegDecoder::new_with_options(
                DecoderOptions::new_fast().jpeg_set_out_colorspace(ColorSpace::RGBA),
                data,
            );
            decomp.decode_headers()?;
            match decomp.get_output_colorspace() {
                Some(ColorSpace::RGBA) => {}
                other => bail!("unsupported colorspace {other:?} (expected RGBA)"),
            }

            let Some(size) = decomp.output_buffer_size() else {
                bail!("JPEG headers did not specify an image size");
            };
            let mut buf = vec![0; size];
            decomp.decode_into(&mut buf)?;
            let Some((width, height)) = decomp.dimensions() else {
                bail!("JPEG headers did not specify an image size");
            };
            match ImageBuffer::from_raw(width.into(), height.into(), buf) {
                Some(buf) => buf,
                None => bail!("decoded JPEG data does not match its {width}x{height} size"),
            }
        }
    };

    Ok(Image { buf })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::*;

    #[test]
    fn backend_selection() {
        assert_eq!(
            parse_backend(Err(VarError::NotPresent)),
            Ok(JpegBackend::ZuneJpeg)
        );
        assert_eq!(
            parse_backend(Ok("jpeg-decoder".into())),
            Ok(JpegBackend::JpegDecoder)
        );
        assert!(parse_backend(Ok("mozjpeg".into())).is_err());
        assert!(parse_backend(Err(VarError::NotUnicode(OsString::from("x")))).is_err());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(decode_jpeg(&[0xFF, 0xD8, 0x00, 0x01]).is_err());
    }
}
