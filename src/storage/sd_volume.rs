//! SD/flash-card-backed log volume over embedded-sdmmc.
//!
//! Blocking, like the rest of the card access on the shared SPI bus; all
//! calls happen on the consumer task so this is acceptable in practice.

use embedded_sdmmc::{Mode, SdCard, SdCardError, TimeSource, VolumeIdx, VolumeManager};

use super::LogVolume;
use crate::config::LOG_FILE_NAME;

type SdError = embedded_sdmmc::Error<SdCardError>;

pub struct SdVolume<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    volume_mgr: VolumeManager<SdCard<S, D>, T, 4, 4, 1>,
}

impl<S, D, T> SdVolume<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    pub fn new(sd_card: SdCard<S, D>, ts: T) -> Self {
        Self {
            volume_mgr: VolumeManager::new(sd_card, ts),
        }
    }
}

impl<S, D, T> LogVolume for SdVolume<S, D, T>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
    T: TimeSource,
{
    type Error = SdError;

    fn mount(&mut self) -> Result<(), Self::Error> {
        // Opening volume 0 and its root directory proves the card answers
        // and carries a readable filesystem.
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        // embedded-sdmmc cannot lay down a fresh FAT; wiping the telemetry
        // file is the recovery this volume can offer.
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        match root_dir.delete_file_in_dir(LOG_FILE_NAME) {
            Ok(()) | Err(embedded_sdmmc::Error::NotFound) => {}
            Err(e) => {
                let _ = root_dir.close();
                let _ = volume0.close();
                return Err(e);
            }
        }

        root_dir.close()?;
        volume0.close()?;

        Ok(())
    }

    fn size_of(&mut self, path: &str) -> Result<u64, Self::Error> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let mut open_err: Option<Self::Error> = None;
        let size = match root_dir.open_file_in_dir(path, Mode::ReadOnly) {
            Ok(file) => {
                let length = file.length() as u64;
                file.close()?;
                length
            }
            Err(embedded_sdmmc::Error::NotFound) => 0,
            Err(e) => {
                open_err = Some(e);
                0
            }
        };

        if let Some(e) = open_err {
            let _ = root_dir.close();
            let _ = volume0.close();
            return Err(e);
        }

        root_dir.close()?;
        volume0.close()?;

        Ok(size)
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<usize, Self::Error> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let file = root_dir.open_file_in_dir(path, Mode::ReadWriteCreateOrAppend)?;
        file.write(data)?;

        file.close()?;
        root_dir.close()?;
        volume0.close()?;

        Ok(data.len())
    }

    fn read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let mut open_err: Option<Self::Error> = None;
        let read = match root_dir.open_file_in_dir(path, Mode::ReadOnly) {
            Ok(file) => {
                if offset >= file.length() as u64 {
                    file.close()?;
                    0
                } else {
                    file.seek_from_start(offset as u32)?;
                    let n = file.read(buf)?;
                    file.close()?;
                    n
                }
            }
            Err(embedded_sdmmc::Error::NotFound) => 0,
            Err(e) => {
                open_err = Some(e);
                0
            }
        };

        if let Some(e) = open_err {
            let _ = root_dir.close();
            let _ = volume0.close();
            return Err(e);
        }

        root_dir.close()?;
        volume0.close()?;

        Ok(read)
    }

    fn remove(&mut self, path: &str) -> Result<bool, Self::Error> {
        let volume0 = self.volume_mgr.open_volume(VolumeIdx(0))?;
        let root_dir = volume0.open_root_dir()?;

        let existed = match root_dir.delete_file_in_dir(path) {
            Ok(()) => true,
            Err(embedded_sdmmc::Error::NotFound) => false,
            Err(e) => {
                let _ = root_dir.close();
                let _ = volume0.close();
                return Err(e);
            }
        };

        root_dir.close()?;
        volume0.close()?;

        Ok(existed)
    }
}
