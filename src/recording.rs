use bytesize::ByteSize;
use colored::Colorize;
use rustfft::num_complex::Complex64;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

pub enum IqFileType {
    TypePairFloat32,
    TypePairInt16,
    TypeOneInt8,
}

impl FromStr for IqFileType {
    type Err = Box<dyn Error>;
    fn from_str(input: &str) -> Result<IqFileType, Self::Err> {
        match input {
            "2xf32" => Ok(IqFileType::TypePairFloat32),
            "2xi16" => Ok(IqFileType::TypePairInt16),
            "i8" => Ok(IqFileType::TypeOneInt8),
            _ => Err(format!("Failed to parse {}", input).into()),
        }
    }
}

impl fmt::Display for IqFileType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IqFileType::TypePairFloat32 => write!(f, "2xf32"),
            IqFileType::TypePairInt16 => write!(f, "2xi16"),
            IqFileType::TypeOneInt8 => write!(f, "i8"),
        }
    }
}

/// Sequential reader over a raw IQ capture. Keeps the file handle open and
/// counts delivered samples so replay producers can stamp each block with the
/// capture-relative time of its first sample.
pub struct IqRecording {
    reader: BufReader<File>,
    file_path: PathBuf,
    file_type: IqFileType,
    fs: f64,
    nof_read: u64,
}

impl IqRecording {
    pub fn open(file_path: &Path, fs: f64, file_type: IqFileType) -> Result<Self, Box<dyn Error>> {
        let file = File::open(file_path)?;
        let file_size = file.metadata()?.len();
        let sample_size = Self::sample_size_bytes(&file_type) as f64;
        let duration_sec = file_size as f64 / fs / sample_size;

        log::info!(
            "capture: {} -- {file_type} {} duration: {:.1} secs",
            file_path.display().to_string().green(),
            ByteSize::b(file_size).to_string().bold(),
            duration_sec
        );

        Ok(Self {
            reader: BufReader::new(file),
            file_path: file_path.to_path_buf(),
            file_type,
            fs,
            nof_read: 0,
        })
    }

    fn sample_size_bytes(file_type: &IqFileType) -> usize {
        match file_type {
            IqFileType::TypeOneInt8 => 1,
            IqFileType::TypePairInt16 => 2 * 2,
            IqFileType::TypePairFloat32 => 2 * 4,
        }
    }

    /// Capture-relative timestamp of the next sample to be read.
    pub fn ts_sec(&self) -> f64 {
        self.nof_read as f64 / self.fs
    }

    pub fn seek_samples(&mut self, off_samples: u64) -> Result<(), Box<dyn Error>> {
        let off = off_samples * Self::sample_size_bytes(&self.file_type) as u64;
        self.reader.seek(SeekFrom::Start(off))?;
        self.nof_read = off_samples;
        Ok(())
    }

    /// Fill `dest` in stream order. Returns the number of samples delivered,
    /// short only when the capture ends.
    pub fn read_into(&mut self, dest: &mut [Complex64]) -> Result<usize, Box<dyn Error>> {
        let sample_size = Self::sample_size_bytes(&self.file_type);
        let mut bytes = vec![0u8; dest.len() * sample_size];

        let mut filled = 0;
        while filled < bytes.len() {
            let n = self.reader.read(&mut bytes[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        let nof_samples = filled / sample_size;

        for (i, dst) in dest.iter_mut().take(nof_samples).enumerate() {
            let off = i * sample_size;
            *dst = match self.file_type {
                IqFileType::TypeOneInt8 => Complex64 {
                    re: bytes[off] as i8 as f64 / i8::MAX as f64,
                    im: 0.0,
                },
                IqFileType::TypePairInt16 => {
                    let i = i16::from_le_bytes([bytes[off], bytes[off + 1]]);
                    let q = i16::from_le_bytes([bytes[off + 2], bytes[off + 3]]);
                    Complex64 {
                        re: i as f64 / i16::MAX as f64,
                        im: q as f64 / i16::MAX as f64,
                    }
                }
                IqFileType::TypePairFloat32 => {
                    let i = f32::from_le_bytes([
                        bytes[off],
                        bytes[off + 1],
                        bytes[off + 2],
                        bytes[off + 3],
                    ]);
                    let q = f32::from_le_bytes([
                        bytes[off + 4],
                        bytes[off + 5],
                        bytes[off + 6],
                        bytes[off + 7],
                    ]);
                    Complex64 {
                        re: i as f64,
                        im: q as f64,
                    }
                }
            };
        }

        self.nof_read += nof_samples as u64;
        log::debug!(
            "read_into: {} delivered {} samples, t={:.4}",
            self.file_path.display(),
            nof_samples,
            self.ts_sec()
        );
        Ok(nof_samples)
    }
}

/// Write a capture in the raw float32-pair little-endian format.
pub fn write_f32_capture(file_path: &Path, samples: &[Complex64]) -> Result<(), Box<dyn Error>> {
    let mut writer = BufWriter::new(File::create(file_path)?);
    for s in samples {
        writer.write_all(&(s.re as f32).to_le_bytes())?;
        writer.write_all(&(s.im as f32).to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> Vec<Complex64> {
        (0..n)
            .map(|i| Complex64::new(i as f64 * 1e-3, -(i as f64) * 1e-3))
            .collect()
    }

    #[test]
    fn test_f32_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let samples = ramp(300);
        write_f32_capture(&path, &samples).unwrap();

        let mut rec = IqRecording::open(&path, 1000.0, IqFileType::TypePairFloat32).unwrap();
        let mut dest = vec![Complex64::default(); 300];
        assert_eq!(rec.read_into(&mut dest).unwrap(), 300);
        for (a, b) in samples.iter().zip(dest.iter()) {
            assert!((a - b).norm() < 1e-6);
        }
        // end of capture
        assert_eq!(rec.read_into(&mut dest).unwrap(), 0);
    }

    #[test]
    fn test_seek_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        write_f32_capture(&path, &ramp(100)).unwrap();

        let mut rec = IqRecording::open(&path, 1000.0, IqFileType::TypePairFloat32).unwrap();
        let mut dest = vec![Complex64::default(); 40];
        rec.read_into(&mut dest).unwrap();
        assert!((rec.ts_sec() - 0.040).abs() < 1e-12);

        rec.seek_samples(10).unwrap();
        assert!((rec.ts_sec() - 0.010).abs() < 1e-12);
        rec.read_into(&mut dest).unwrap();
        assert!((dest[0].re - 0.010).abs() < 1e-6);
    }

    #[test]
    fn test_short_read_at_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        write_f32_capture(&path, &ramp(25)).unwrap();

        let mut rec = IqRecording::open(&path, 1000.0, IqFileType::TypePairFloat32).unwrap();
        let mut dest = vec![Complex64::default(); 40];
        assert_eq!(rec.read_into(&mut dest).unwrap(), 25);
    }

    #[test]
    fn test_file_type_parse() {
        assert!(IqFileType::from_str("2xf32").is_ok());
        assert!(IqFileType::from_str("2xi16").is_ok());
        assert!(IqFileType::from_str("bogus").is_err());
    }
}
