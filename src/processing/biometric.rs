use std::sync::Arc;

use image::DynamicImage;
use log::{debug, warn};

use crate::models::{BiometricGroup, BiometricTemplate, FaceImage, ImageMime};
use crate::utils::PassportError;
use crate::verification::tlv::Tlv;

/// Turns encoded image bytes from the chip into pixels.
pub trait FaceImageDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, PassportError>;
}

/// JPEG/PNG through the `image` crate.
pub struct StandardImageDecoder;

impl FaceImageDecoder for StandardImageDecoder {
    fn decode(&self, data: &[u8]) -> Result<DynamicImage, PassportError> {
        image::load_from_memory(data).map_err(|e| PassportError::ImageProcessingError(e.to_string()))
    }
}

/// Placeholder until a JPEG 2000 codec is plugged in; the encoded bytes are
/// still kept on the record.
pub struct NoJpeg2000Decoder;

impl FaceImageDecoder for NoJpeg2000Decoder {
    fn decode(&self, _data: &[u8]) -> Result<DynamicImage, PassportError> {
        Err(PassportError::ImageProcessingError("No JPEG 2000 decoder configured".to_string()))
    }
}

/// The decoder pair a chip session uses, chosen per image by MIME type.
#[derive(Clone)]
pub struct ImageDecoders {
    pub standard: Arc<dyn FaceImageDecoder>,
    pub jpeg2000: Arc<dyn FaceImageDecoder>,
}

impl Default for ImageDecoders {
    fn default() -> Self {
        ImageDecoders {
            standard: Arc::new(StandardImageDecoder),
            jpeg2000: Arc::new(NoJpeg2000Decoder),
        }
    }
}

impl ImageDecoders {
    pub fn with_jpeg2000(jpeg2000: Arc<dyn FaceImageDecoder>) -> Self {
        ImageDecoders {
            jpeg2000,
            ..ImageDecoders::default()
        }
    }

    /// Fill in dimensions, or the decode error, without ever dropping the
    /// encoded bytes.
    pub fn decode_into(&self, face: &mut FaceImage) {
        let decoder = match face.mime {
            ImageMime::Jpeg2000 => &self.jpeg2000,
            _ => &self.standard,
        };
        match decoder.decode(&face.data) {
            Ok(img) => {
                face.width = Some(img.width());
                face.height = Some(img.height());
            }
            Err(e) => {
                warn!("Could not decode {} image: {}", face.mime.mime_type(), e);
                face.decode_error = Some(e.to_string());
            }
        }
    }
}

// ISO/IEC 19794-5 facial record layout
const FACE_HEADER_LEN: usize = 14;
const FACE_INFO_LEN: usize = 20;
const FEATURE_POINT_LEN: usize = 8;
const IMAGE_INFO_LEN: usize = 12;

pub struct BiometricProcessor;

fn face_image(data: Vec<u8>, declared: Option<ImageMime>) -> FaceImage {
    let mime = declared.unwrap_or_else(|| ImageMime::sniff(&data));
    FaceImage {
        mime,
        data,
        width: None,
        height: None,
        decode_error: None,
    }
}

impl BiometricProcessor {
    /// Image bytes of one ISO 19794-5 record plus the type its header declares.
    pub fn facial_record_image(record: &[u8]) -> Result<(Vec<u8>, Option<ImageMime>), PassportError> {
        if record.len() < FACE_HEADER_LEN + FACE_INFO_LEN + IMAGE_INFO_LEN || &record[..3] != b"FAC" {
            return Err(PassportError::DataGroupError("Not an ISO 19794-5 facial record".to_string()));
        }
        let info = &record[FACE_HEADER_LEN..];
        let feature_points = u16::from_be_bytes([info[4], info[5]]) as usize;
        let image_info = FACE_HEADER_LEN + FACE_INFO_LEN + feature_points * FEATURE_POINT_LEN;
        let image_start = image_info + IMAGE_INFO_LEN;
        if image_start > record.len() {
            return Err(PassportError::DataGroupError("Facial record truncated".to_string()));
        }
        let declared = match record[image_info + 1] {
            0x00 => Some(ImageMime::Jpeg),
            0x01 => Some(ImageMime::Jpeg2000),
            _ => None,
        };
        Ok((record[image_start..].to_vec(), declared))
    }

    /// Biometric data blocks (5F2E or 7F2E) of every 7F60 template in a
    /// CBEFF group, with the owner/type from the biometric header.
    fn templates(group: &Tlv) -> Result<Vec<BiometricTemplate>, PassportError> {
        let info_group = group
            .find(0x7F61)
            .ok_or_else(|| PassportError::DataGroupError("Biometric information group missing".to_string()))?;
        let mut templates = Vec::new();
        for template in info_group.children()?.into_iter().filter(|t| t.tag == 0x7F60) {
            let header = template.find(0xA1);
            let read_u16 = |tag: u32| {
                header
                    .as_ref()
                    .and_then(|h| h.find(tag))
                    .filter(|t| t.value.len() == 2)
                    .map(|t| u16::from_be_bytes([t.value[0], t.value[1]]))
            };
            let data = template
                .find(0x5F2E)
                .or_else(|| template.find(0x7F2E))
                .map(|t| t.value)
                .unwrap_or_default();
            templates.push(BiometricTemplate {
                format_owner: read_u16(0x87),
                format_type: read_u16(0x88),
                data,
            });
        }
        Ok(templates)
    }

    /// DG2: every facial image. One bad record does not hide the others.
    pub fn faces(bytes: &[u8], decoders: &ImageDecoders) -> Result<Vec<FaceImage>, PassportError> {
        let (group, _) = Tlv::parse(bytes)?;
        if group.tag != 0x75 {
            return Err(PassportError::DataGroupError(format!("DG2: unexpected tag {:X}", group.tag)));
        }
        let mut faces = Vec::new();
        for (index, template) in Self::templates(&group)?.into_iter().enumerate() {
            let (data, declared) = match Self::facial_record_image(&template.data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!("DG2 record {}: {}, using raw block", index, e);
                    (template.data, None)
                }
            };
            if data.is_empty() {
                continue;
            }
            let mut face = face_image(data, declared);
            decoders.decode_into(&mut face);
            faces.push(face);
        }
        Ok(faces)
    }

    /// DG3 (fingerprints) and DG4 (iris) are kept as raw templates.
    pub fn template_group(data_group: u8, bytes: &[u8]) -> Result<BiometricGroup, PassportError> {
        let (group, _) = Tlv::parse(bytes)?;
        Ok(BiometricGroup {
            data_group,
            templates: Self::templates(&group)?,
        })
    }

    /// DG5 (portraits, 5F40) and DG7 (signatures, 5F43).
    pub fn displayed_images(bytes: &[u8], image_tag: u32, decoders: &ImageDecoders) -> Result<Vec<FaceImage>, PassportError> {
        let (group, _) = Tlv::parse(bytes)?;
        let mut images = Vec::new();
        for object in group.children()?.into_iter().filter(|t| t.tag == image_tag) {
            let mut image = face_image(object.value, None);
            decoders.decode_into(&mut image);
            images.push(image);
        }
        Ok(images)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::verification::tlv;
    use image::{ImageOutputFormat, RgbImage};
    use std::io::Cursor;

    pub(crate) fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| image::Rgb([(x * 8) as u8, (y * 8) as u8, 128]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageOutputFormat::Jpeg(80))
            .unwrap();
        out.into_inner()
    }

    /// Minimal ISO 19794-5 record around an image.
    pub(crate) fn facial_record(image: &[u8], image_type: u8) -> Vec<u8> {
        let mut record = b"FAC\0010\0".to_vec();
        let total = (FACE_HEADER_LEN + FACE_INFO_LEN + IMAGE_INFO_LEN + image.len()) as u32;
        record.extend(total.to_be_bytes());
        record.extend([0x00, 0x01]);
        record.extend(((FACE_INFO_LEN + IMAGE_INFO_LEN + image.len()) as u32).to_be_bytes());
        record.extend([0u8; 16]);
        record.extend([0x01, image_type]);
        record.extend([0u8; 10]);
        record.extend_from_slice(image);
        record
    }

    pub(crate) fn dg2(images: &[Vec<u8>]) -> Vec<u8> {
        let mut info = tlv::encode(0x02, &[images.len() as u8]);
        for record in images {
            let mut template = tlv::encode(0xA1, &tlv::encode(0x87, &[0x01, 0x01]));
            template.extend(tlv::encode(0x5F2E, record));
            info.extend(tlv::encode(0x7F60, &template));
        }
        tlv::encode(0x75, &tlv::encode(0x7F61, &info))
    }

    #[test]
    fn test_dg2_jpeg_face() {
        let jpeg = sample_jpeg(24, 32);
        let bytes = dg2(&[facial_record(&jpeg, 0x00)]);
        let faces = BiometricProcessor::faces(&bytes, &ImageDecoders::default()).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].mime, ImageMime::Jpeg);
        assert_eq!(faces[0].data, jpeg);
        assert_eq!((faces[0].width, faces[0].height), (Some(24), Some(32)));
        assert!(faces[0].decode_error.is_none());
    }

    #[test]
    fn test_undecodable_image_does_not_abort_others() {
        let jp2 = vec![0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A];
        let jpeg = sample_jpeg(8, 8);
        let bytes = dg2(&[facial_record(&jp2, 0x01), facial_record(&jpeg, 0x00)]);
        let faces = BiometricProcessor::faces(&bytes, &ImageDecoders::default()).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].mime, ImageMime::Jpeg2000);
        assert!(faces[0].decode_error.is_some());
        assert_eq!(faces[0].data, jp2);
        assert_eq!(faces[1].width, Some(8));
    }

    struct FixedSize;

    impl FaceImageDecoder for FixedSize {
        fn decode(&self, _data: &[u8]) -> Result<DynamicImage, PassportError> {
            Ok(DynamicImage::new_rgb8(3, 4))
        }
    }

    #[test]
    fn test_jpeg2000_goes_to_dedicated_decoder() {
        let jp2 = vec![0xFF, 0x4F, 0xFF, 0x51, 0x00];
        let bytes = dg2(&[facial_record(&jp2, 0x01)]);
        let decoders = ImageDecoders::with_jpeg2000(Arc::new(FixedSize));
        let faces = BiometricProcessor::faces(&bytes, &decoders).unwrap();
        assert_eq!(faces[0].width, Some(3));
    }

    #[test]
    fn test_template_group_and_displayed_images() {
        let mut info = tlv::encode(0x02, &[1]);
        let mut template = tlv::encode(0xA1, &[tlv::encode(0x87, &[0x01, 0x01]), tlv::encode(0x88, &[0x00, 0x07])].concat());
        template.extend(tlv::encode(0x5F2E, &[1, 2, 3]));
        info.extend(tlv::encode(0x7F60, &template));
        let dg3 = tlv::encode(0x63, &tlv::encode(0x7F61, &info));
        let group = BiometricProcessor::template_group(3, &dg3).unwrap();
        assert_eq!(group.templates.len(), 1);
        assert_eq!(group.templates[0].format_type, Some(7));
        assert_eq!(group.templates[0].data, vec![1, 2, 3]);

        let jpeg = sample_jpeg(5, 6);
        let dg7 = tlv::encode(0x67, &[tlv::encode(0x02, &[1]), tlv::encode(0x5F43, &jpeg)].concat());
        let signatures = BiometricProcessor::displayed_images(&dg7, 0x5F43, &ImageDecoders::default()).unwrap();
        assert_eq!(signatures[0].height, Some(6));
    }
}
