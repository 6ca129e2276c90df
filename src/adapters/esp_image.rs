//! Firmware image target backed by the `esp-ota` crate.
//!
//! Writes the incoming image to the inactive OTA partition. Bytes
//! written survive a dropped session as long as the device stays up;
//! after a restart the download begins again at offset 0.
//!
//! Confirmation uses the bootloader rollback state: a freshly booted
//! image is `PENDING_VERIFY` until [`ImageTarget::confirm`] marks it
//! valid.

use log::{info, warn};

use crate::client::ports::ImageTarget;
use crate::error::ImageError;

/// First byte of every ESP application image.
const ESP_IMAGE_MAGIC: u8 = 0xE9;

enum Slot {
    Empty,
    Writing {
        update: esp_ota::OtaUpdate,
        size: u32,
        written: u32,
    },
    Complete(esp_ota::CompletedOtaUpdate),
}

pub struct EspImageTarget {
    slot: Slot,
}

impl EspImageTarget {
    pub fn new() -> Self {
        Self { slot: Slot::Empty }
    }
}

impl Default for EspImageTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageTarget for EspImageTarget {
    fn init(&mut self, size: u32) -> Result<(), ImageError> {
        if let Slot::Writing { size: current, .. } = &self.slot {
            if *current == size {
                return Ok(());
            }
        }
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("FOTA: esp-ota begin failed: {e:?}");
            ImageError::InitFailed
        })?;
        self.slot = Slot::Writing {
            update,
            size,
            written: 0,
        };
        Ok(())
    }

    fn identify(&self, first_chunk: &[u8]) -> bool {
        first_chunk.first() == Some(&ESP_IMAGE_MAGIC)
    }

    fn write(&mut self, chunk: &[u8]) -> Result<(), ImageError> {
        let Slot::Writing {
            update,
            size,
            written,
        } = &mut self.slot
        else {
            return Err(ImageError::WriteFailed);
        };
        if *written + chunk.len() as u32 > *size {
            return Err(ImageError::WriteFailed);
        }
        update.write(chunk).map_err(|e| {
            warn!("FOTA: esp-ota write failed: {e:?}");
            ImageError::WriteFailed
        })?;
        *written += chunk.len() as u32;
        Ok(())
    }

    fn offset(&self) -> u32 {
        match &self.slot {
            Slot::Writing { written, .. } => *written,
            _ => 0,
        }
    }

    fn finalize(&mut self) -> Result<(), ImageError> {
        match core::mem::replace(&mut self.slot, Slot::Empty) {
            Slot::Writing { update, .. } => {
                let completed = update.finalize().map_err(|e| {
                    warn!("FOTA: esp-ota finalize failed: {e:?}");
                    ImageError::VerifyFailed
                })?;
                self.slot = Slot::Complete(completed);
                Ok(())
            }
            other => {
                self.slot = other;
                Err(ImageError::VerifyFailed)
            }
        }
    }

    fn mark_pending(&mut self) -> Result<(), ImageError> {
        let Slot::Complete(completed) = &mut self.slot else {
            return Err(ImageError::BootFailed);
        };
        completed.set_as_boot_partition().map_err(|e| {
            warn!("FOTA: set_as_boot_partition failed: {e:?}");
            ImageError::BootFailed
        })
    }

    fn schedule_update(&mut self) -> Result<(), ImageError> {
        // The boot partition switch in `mark_pending` takes effect on restart.
        Ok(())
    }

    fn reset(&mut self) {
        // esp-ota aborts the update when OtaUpdate is dropped.
        self.slot = Slot::Empty;
    }

    fn reboot(&mut self) {
        info!("FOTA: restarting");
        esp_ota::restart();
    }

    fn is_confirmed(&self) -> bool {
        use esp_idf_svc::sys::{
            ESP_OK, esp_ota_get_running_partition, esp_ota_get_state_partition,
            esp_ota_img_states_t, esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY,
        };

        let mut state: esp_ota_img_states_t = 0;
        // SAFETY: the running partition pointer is static for the process lifetime.
        let ret = unsafe { esp_ota_get_state_partition(esp_ota_get_running_partition(), &mut state) };
        ret != ESP_OK || state != esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY
    }

    fn confirm(&mut self) -> Result<(), ImageError> {
        esp_ota::mark_app_valid().map_err(|e| {
            warn!("FOTA: mark_app_valid failed: {e:?}");
            ImageError::BootFailed
        })
    }
}
