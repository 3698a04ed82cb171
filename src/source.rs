use std::{
    fmt,
    io::Read,
    path::{Path, PathBuf},
};

use kornia_image::{Image, ImageSize, allocator::CpuAllocator};
use serde::Serialize;

use crate::error::CaptionError;

/// A normalized rgb8 image with shape [H, W, 3].
pub type DecodedImage = Image<u8, 3, CpuAllocator>;

/// Where an image comes from.
///
/// The classification is done once from the raw user input and every later step
/// branches on the variant instead of looking at the string again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "location", rename_all = "snake_case")]
pub enum ImageSource {
    /// A file on the local filesystem.
    LocalPath(PathBuf),
    /// An `http` or `https` url.
    RemoteUrl(String),
}

impl ImageSource {
    /// Classifies a raw input: `http://` and `https://` prefixes are urls, anything else is a path.
    pub fn classify(input: &str) -> Self {
        if input.starts_with("http://") || input.starts_with("https://") {
            ImageSource::RemoteUrl(input.to_string())
        } else {
            ImageSource::LocalPath(PathBuf::from(input))
        }
    }

    /// Returns true if the image has to be downloaded.
    pub fn is_remote(&self) -> bool {
        matches!(self, ImageSource::RemoteUrl(_))
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::LocalPath(path) => write!(f, "{}", path.display()),
            ImageSource::RemoteUrl(url) => f.write_str(url),
        }
    }
}

/// Downloads the raw bytes behind a url.
pub trait Fetcher {
    /// Returns the full response body, or a `CaptionError::Network` on any transport
    /// failure or non-success status.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, CaptionError>;
}

/// Blocking http fetcher backed by reqwest.
///
/// No timeout is set beyond the client defaults.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Builds the http client. Fails only if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, CaptionError> {
        let network_error = |reason: String| CaptionError::Network {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| network_error(e.to_string()))?;

        // stream the body instead of buffering it inside reqwest
        let mut bytes = Vec::new();
        response
            .read_to_end(&mut bytes)
            .map_err(|e| network_error(e.to_string()))?;

        Ok(bytes)
    }
}

/// Turns raw inputs into decoded rgb8 images.
pub struct Resolver<F: Fetcher = HttpFetcher> {
    fetcher: F,
}

impl Resolver<HttpFetcher> {
    /// Creates a resolver that downloads remote images over http.
    pub fn http() -> Result<Self, reqwest::Error> {
        Ok(Self::new(HttpFetcher::new()?))
    }
}

impl<F: Fetcher> Resolver<F> {
    /// Creates a resolver that downloads remote images through `fetcher`.
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Classifies and resolves a raw input string.
    pub fn resolve(&self, input: &str) -> Result<DecodedImage, CaptionError> {
        self.resolve_source(&ImageSource::classify(input))
    }

    /// Resolves an already classified source.
    ///
    /// Urls only ever go through the fetcher and paths only ever touch the filesystem.
    pub fn resolve_source(&self, source: &ImageSource) -> Result<DecodedImage, CaptionError> {
        let image = match source {
            ImageSource::LocalPath(path) => self.resolve_path(path)?,
            ImageSource::RemoteUrl(url) => self.resolve_url(url)?,
        };
        log::debug!("Loaded {} with size {}", source, image.size());
        Ok(image)
    }

    fn resolve_path(&self, path: &Path) -> Result<DecodedImage, CaptionError> {
        if !path.exists() {
            return Err(CaptionError::NotFound(path.to_path_buf()));
        }

        log::debug!("Loading image from file: {}", path.display());

        let bytes = std::fs::read(path).map_err(|e| CaptionError::Decode {
            origin: path.display().to_string(),
            reason: e.to_string(),
        })?;

        decode_image(&bytes, &path.display().to_string())
    }

    fn resolve_url(&self, url: &str) -> Result<DecodedImage, CaptionError> {
        log::debug!("Loading image from url: {url}");
        let bytes = self.fetcher.fetch(url)?;
        decode_image(&bytes, url)
    }
}

/// Decodes any supported encoded image and converts it to rgb8.
///
/// # Arguments
///
/// * `bytes` - The encoded image (jpeg, png, webp, ...)
/// * `origin` - Where the bytes came from, used in the error message
pub fn decode_image(bytes: &[u8], origin: &str) -> Result<DecodedImage, CaptionError> {
    let decode_error = |reason: String| CaptionError::Decode {
        origin: origin.to_string(),
        reason,
    };

    let rgb = image::load_from_memory(bytes)
        .map_err(|e| decode_error(e.to_string()))?
        .to_rgb8();

    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        return Err(decode_error("image has no pixels".to_string()));
    }

    let size = ImageSize {
        width: width as usize,
        height: height as usize,
    };

    Image::new(size, rgb.into_raw(), CpuAllocator).map_err(|e| decode_error(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::cell::RefCell;

    // records every url it is asked for and serves a fixed payload
    struct RecordingFetcher {
        calls: RefCell<Vec<String>>,
        payload: Result<Vec<u8>, String>,
    }

    impl RecordingFetcher {
        fn serving(payload: Result<Vec<u8>, String>) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                payload,
            }
        }
    }

    impl Fetcher for RecordingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, CaptionError> {
            self.calls.borrow_mut().push(url.to_string());
            self.payload.clone().map_err(|reason| CaptionError::Network {
                url: url.to_string(),
                reason,
            })
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([10, 200, 30]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png)
            .expect("encode png");
        bytes.into_inner()
    }

    #[test]
    fn classify_by_scheme_prefix() {
        assert_eq!(
            ImageSource::classify("https://example.com/a.jpg"),
            ImageSource::RemoteUrl("https://example.com/a.jpg".to_string())
        );
        assert!(ImageSource::classify("http://example.com/a.jpg").is_remote());
        assert_eq!(
            ImageSource::classify("images/cat.png"),
            ImageSource::LocalPath(PathBuf::from("images/cat.png"))
        );
        // only the exact lowercase schemes count as urls
        assert!(!ImageSource::classify("ftp://example.com/a.jpg").is_remote());
        assert!(!ImageSource::classify("HTTPS://example.com/a.jpg").is_remote());
    }

    #[test]
    fn urls_never_touch_the_filesystem() {
        let resolver = Resolver::new(RecordingFetcher::serving(Ok(png_bytes(4, 3))));
        // a url that looks like a missing local file must still go to the network
        let image = resolver
            .resolve("http://localhost/nonexistent.jpg")
            .expect("resolve url");

        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 3);
        assert_eq!(
            *resolver.fetcher.calls.borrow(),
            vec!["http://localhost/nonexistent.jpg".to_string()]
        );
    }

    #[test]
    fn missing_path_is_not_found_without_fetching() {
        let resolver = Resolver::new(RecordingFetcher::serving(Ok(png_bytes(2, 2))));
        let err = resolver.resolve("nonexistent.jpg").unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(resolver.fetcher.calls.borrow().is_empty());
    }

    #[test]
    fn network_failure_is_classified() {
        let resolver = Resolver::new(RecordingFetcher::serving(Err("404 Not Found".to_string())));
        let err = resolver.resolve("https://example.com/gone.png").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let resolver = Resolver::new(RecordingFetcher::serving(Ok(b"<html>nope</html>".to_vec())));
        let err = resolver.resolve("https://example.com/page").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[test]
    fn local_file_is_decoded_to_rgb8() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;

        let jpeg_path = dir.path().join("red.jpg");
        image::RgbImage::from_pixel(16, 8, image::Rgb([255, 0, 0])).save(&jpeg_path)?;

        let gray_path = dir.path().join("gray.png");
        image::GrayImage::from_pixel(5, 7, image::Luma([128])).save(&gray_path)?;

        let resolver = Resolver::new(RecordingFetcher::serving(Err("unused".to_string())));

        let image = resolver.resolve(jpeg_path.to_str().unwrap())?;
        assert_eq!(image.size(), ImageSize { width: 16, height: 8 });
        assert_eq!(image.num_channels(), 3);

        // grayscale input is expanded to three channels
        let image = resolver.resolve(gray_path.to_str().unwrap())?;
        assert_eq!(image.as_slice().len(), 5 * 7 * 3);
        assert!(image.as_slice().iter().all(|&v| v == 128));

        Ok(())
    }

    #[test]
    fn corrupt_local_file_is_a_decode_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg")?;

        let resolver = Resolver::new(RecordingFetcher::serving(Err("unused".to_string())));
        let err = resolver.resolve(path.to_str().unwrap()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::DecodeError);
        assert!(resolver.fetcher.calls.borrow().is_empty());

        Ok(())
    }
}
