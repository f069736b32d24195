use std::io::{self, Write};
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::commands::image::ImageSlotState;
use crate::commands::{self, McuMgrCommand, fs, image, os, suit};
use crate::connection::{Connection, ExecuteError, MtuError};
use crate::header::Operation;
use crate::packet;
use crate::transport::{DEFAULT_TIMEOUT, FAST_TIMEOUT, Transport};

/// Errors of [`SmpClient::os_echo`].
#[derive(Error, Debug, Diagnostic)]
pub enum EchoError {
    /// The built packet exceeds the echo size limit; nothing was sent
    #[error("echo packet of {0} bytes exceeds the limit")]
    #[diagnostic(code(smp_client::client::echo::over_limit))]
    MessageOverLimit(usize),
    /// command execution failed
    #[error(transparent)]
    #[diagnostic(code(smp_client::client::echo::execute))]
    ExecuteError(#[from] ExecuteError),
}

/// Errors of [`SmpClient::fs_download`].
#[derive(Error, Debug, Diagnostic)]
pub enum FileDownloadError {
    /// command execution failed
    #[error("command execution failed")]
    #[diagnostic(code(smp_client::client::file_download::execute))]
    ExecuteError(#[from] ExecuteError),
    /// received offset does not match requested offset
    #[error("received offset does not match requested offset")]
    #[diagnostic(code(smp_client::client::file_download::offset_mismatch))]
    UnexpectedOffset,
    /// writer returned an error
    #[error("writer returned an error")]
    #[diagnostic(code(smp_client::client::file_download::writer))]
    WriterError(#[from] io::Error),
    /// received data does not match reported size
    #[error("received data does not match reported size")]
    #[diagnostic(code(smp_client::client::file_download::size_mismatch))]
    SizeMismatch,
    /// response is missing the file size
    #[error("received data is missing file size information")]
    #[diagnostic(code(smp_client::client::file_download::missing_size))]
    MissingSize,
}

/// Errors of [`SmpClient::fs_upload`].
#[derive(Error, Debug, Diagnostic)]
pub enum FileUploadError {
    /// command execution failed
    #[error("command execution failed")]
    #[diagnostic(code(smp_client::client::file_upload::execute))]
    ExecuteError(#[from] ExecuteError),
    /// the MTU does not leave room for any chunk data
    #[error("MTU too small for an upload chunk")]
    #[diagnostic(code(smp_client::client::file_upload::mtu))]
    MtuTooSmall,
    /// the device rewound the offset outside the file
    #[error("device reported an offset outside the file")]
    #[diagnostic(code(smp_client::client::file_upload::offset))]
    UnexpectedOffset,
}

/// A high level client for SMP device management.
///
/// One method per command; the heavier flows (image upload, firmware
/// upgrade, SUIT envelopes) live in their own engines and borrow the
/// [`Connection`] through [`connection_mut`](SmpClient::connection_mut).
pub struct SmpClient {
    connection: Connection,
}

impl SmpClient {
    /// Creates a client over the given transport.
    pub fn new<T: Transport + Send + 'static>(transport: T) -> Self {
        Self {
            connection: Connection::new(transport),
        }
    }

    /// Creates a client over an existing connection.
    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Mutable access to the underlying connection, used by the upload and
    /// upgrade engines.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.connection
    }

    /// Sets the MTU used for upload chunk sizing.
    pub fn set_upload_mtu(&mut self, mtu: usize) -> Result<(), MtuError> {
        self.connection.set_mtu(mtu)
    }

    fn execute<C: McuMgrCommand>(
        &mut self,
        command: &C,
        timeout: Duration,
    ) -> Result<C::Response, ExecuteError> {
        self.connection.execute(command, timeout)
    }

    // --- OS group ---

    /// Sends an echo request and returns the echoed string.
    ///
    /// Fails locally with [`EchoError::MessageOverLimit`] when the built
    /// packet exceeds [`os::ECHO_MAX_PACKET_SIZE`]; the transport is not
    /// touched in that case.
    pub fn os_echo(&mut self, msg: impl AsRef<str>) -> Result<String, EchoError> {
        let command = os::Echo { d: msg.as_ref() };
        let size = packet::encoded_packet_size(
            self.connection.scheme(),
            Operation::Read,
            crate::Group::Os.code(),
            0,
            &command,
        )
        .map_err(ExecuteError::from)?;
        if size > os::ECHO_MAX_PACKET_SIZE {
            return Err(EchoError::MessageOverLimit(size));
        }

        Ok(self.execute(&command, DEFAULT_TIMEOUT)?.r)
    }

    /// Enables or disables the device console echo.
    pub fn os_console_echo(&mut self, echo: bool) -> Result<(), ExecuteError> {
        self.execute(&os::ConsoleEcho { echo }, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Reads task statistics.
    pub fn os_task_statistics(&mut self) -> Result<os::TaskStatisticsResponse, ExecuteError> {
        self.execute(&os::TaskStatistics, DEFAULT_TIMEOUT)
    }

    /// Reads memory pool statistics.
    pub fn os_memory_pool_statistics(
        &mut self,
    ) -> Result<os::MemoryPoolStatisticsResponse, ExecuteError> {
        self.execute(&os::MemoryPoolStatistics, DEFAULT_TIMEOUT)
    }

    /// Reads the device date and time.
    pub fn os_datetime_read(&mut self) -> Result<chrono::NaiveDateTime, ExecuteError> {
        self.execute(&os::DateTimeGet, DEFAULT_TIMEOUT)
            .map(|response| response.datetime)
    }

    /// Sets the device date and time.
    pub fn os_datetime_write(
        &mut self,
        datetime: chrono::NaiveDateTime,
    ) -> Result<(), ExecuteError> {
        self.execute(&os::DateTimeSet { datetime }, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Triggers a device reset. The acknowledgement uses the fast timeout;
    /// the device drops the link shortly after.
    pub fn os_reset(&mut self) -> Result<(), ExecuteError> {
        self.execute(&os::SystemReset::default(), FAST_TIMEOUT)?;
        Ok(())
    }

    /// Reads the SMP parameters (buffer size and count). Uses the fast
    /// timeout since this doubles as the transfer-parameter probe.
    pub fn os_parameters(&mut self) -> Result<os::ParametersResponse, ExecuteError> {
        self.execute(&os::Parameters, FAST_TIMEOUT)
    }

    /// Reads application info in the given format.
    pub fn os_application_info(
        &mut self,
        format: Option<&str>,
    ) -> Result<String, ExecuteError> {
        self.execute(&os::ApplicationInfo { format }, DEFAULT_TIMEOUT)
            .map(|response| response.output)
    }

    /// Reads the bootloader name.
    pub fn os_bootloader_name(&mut self) -> Result<String, ExecuteError> {
        self.execute(&os::BootloaderName, DEFAULT_TIMEOUT)
            .map(|response| response.bootloader)
    }

    /// Reads the MCUboot bootloader mode.
    pub fn os_bootloader_mode(&mut self) -> Result<os::BootloaderModeResponse, ExecuteError> {
        self.execute(&os::BootloaderMode, DEFAULT_TIMEOUT)
    }

    // --- Image group ---

    /// Lists all images and their slot states.
    pub fn image_list(&mut self) -> Result<Vec<ImageSlotState>, ExecuteError> {
        self.execute(&image::GetImageState, DEFAULT_TIMEOUT)
            .map(|response| response.images)
    }

    /// Marks the image with the given hash for a one-shot test boot.
    pub fn image_test(&mut self, hash: &[u8; 32]) -> Result<Vec<ImageSlotState>, ExecuteError> {
        self.execute(
            &image::SetImageState {
                hash: Some(hash),
                confirm: false,
            },
            DEFAULT_TIMEOUT,
        )
        .map(|response| response.images)
    }

    /// Confirms the image with the given hash, or the currently running
    /// image when `hash` is `None`.
    pub fn image_confirm(
        &mut self,
        hash: Option<&[u8; 32]>,
    ) -> Result<Vec<ImageSlotState>, ExecuteError> {
        self.execute(
            &image::SetImageState {
                hash,
                confirm: true,
            },
            DEFAULT_TIMEOUT,
        )
        .map(|response| response.images)
    }

    /// Erases the secondary slot.
    pub fn image_erase(&mut self, slot: Option<u32>) -> Result<(), ExecuteError> {
        self.execute(&image::ImageErase { slot }, FAST_TIMEOUT)?;
        Ok(())
    }

    /// Clears the pending/confirmed markers of the secondary slot.
    pub fn image_erase_state(&mut self) -> Result<(), ExecuteError> {
        self.execute(&image::EraseState, FAST_TIMEOUT)?;
        Ok(())
    }

    /// Checks whether a core dump is present.
    pub fn image_core_list(&mut self) -> Result<(), ExecuteError> {
        self.execute(&image::CoreList, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Reads a chunk of the stored core dump.
    pub fn image_core_load(&mut self, off: u64) -> Result<image::CoreLoadResponse, ExecuteError> {
        self.execute(&image::CoreLoad { off }, DEFAULT_TIMEOUT)
    }

    /// Erases the stored core dump.
    pub fn image_core_erase(&mut self) -> Result<(), ExecuteError> {
        self.execute(&image::CoreErase, FAST_TIMEOUT)?;
        Ok(())
    }

    // --- FS group ---

    /// Uploads `data` to the file `name`, chunked to the frame budget.
    ///
    /// The progress callback receives `(bytes_acked, total)` and may return
    /// `false` to abandon the transfer.
    pub fn fs_upload(
        &mut self,
        name: impl AsRef<str>,
        data: &[u8],
        mut progress: Option<&mut dyn FnMut(u64, u64) -> bool>,
    ) -> Result<(), FileUploadError> {
        let name = name.as_ref();
        let total = data.len() as u64;
        let mut offset: u64 = 0;

        while offset < total || total == 0 {
            let capacity = self.fs_chunk_capacity(name, offset)?;
            let position = usize::try_from(offset).map_err(|_| FileUploadError::UnexpectedOffset)?;
            let take = capacity.min(data.len() - position);

            let response = self.execute(
                &fs::FileUpload {
                    off: offset,
                    data: &data[position..position + take],
                    name,
                    len: (offset == 0).then_some(total),
                },
                DEFAULT_TIMEOUT,
            )?;

            if response.off > total {
                return Err(FileUploadError::UnexpectedOffset);
            }
            offset = response.off;

            if let Some(progress) = progress.as_deref_mut() {
                if !progress(offset, total) {
                    break;
                }
            }
            if total == 0 {
                break;
            }
        }

        Ok(())
    }

    fn fs_chunk_capacity(&self, name: &str, offset: u64) -> Result<usize, FileUploadError> {
        let skeleton = fs::FileUpload {
            off: offset,
            data: &[0u8],
            name,
            len: (offset == 0).then_some(u64::MAX),
        };
        let packet_with_one_byte = packet::encoded_packet_size(
            self.connection.scheme(),
            Operation::Write,
            crate::Group::Fs.code(),
            0,
            &skeleton,
        )
        .map_err(ExecuteError::from)?;

        let estimated = self
            .connection
            .frame_budget()
            .checked_sub(packet_with_one_byte - 1)
            .filter(|estimated| *estimated > 0)
            .ok_or(FileUploadError::MtuTooSmall)?;
        let data_length_bytes: usize = if estimated <= usize::from(u8::MAX) {
            1
        } else if estimated <= usize::from(u16::MAX) {
            2
        } else {
            4
        };
        estimated
            .checked_sub(data_length_bytes)
            .filter(|capacity| *capacity > 0)
            .ok_or(FileUploadError::MtuTooSmall)
    }

    /// Downloads the file `name` into `writer`.
    pub fn fs_download<W: Write>(
        &mut self,
        name: impl AsRef<str>,
        mut writer: W,
    ) -> Result<(), FileDownloadError> {
        let name = name.as_ref();
        let response = self.execute(&fs::FileDownload { name, off: 0 }, DEFAULT_TIMEOUT)?;

        let file_len = response.len.ok_or(FileDownloadError::MissingSize)?;
        if response.off != 0 {
            return Err(FileDownloadError::UnexpectedOffset);
        }

        let mut offset = 0;

        writer.write_all(&response.data)?;
        offset += response.data.len() as u64;

        while offset < file_len {
            let response =
                self.execute(&fs::FileDownload { name, off: offset }, DEFAULT_TIMEOUT)?;

            if response.off != offset {
                return Err(FileDownloadError::UnexpectedOffset);
            }

            writer.write_all(&response.data)?;
            offset += response.data.len() as u64;
        }

        if offset != file_len {
            return Err(FileDownloadError::SizeMismatch);
        }

        Ok(())
    }

    /// Reads the size of the file `name`.
    pub fn fs_status(&mut self, name: impl AsRef<str>) -> Result<u64, ExecuteError> {
        self.execute(
            &fs::FileStatus {
                name: name.as_ref(),
            },
            DEFAULT_TIMEOUT,
        )
        .map(|response| response.len)
    }

    /// Computes the IEEE CRC32 of the file `name` on the device.
    pub fn fs_checksum_crc32(&mut self, name: impl AsRef<str>) -> Result<u32, ExecuteError> {
        let response = self.execute(
            &fs::FileChecksum {
                name: name.as_ref(),
                r#type: Some(fs::CHECKSUM_CRC32),
                off: None,
                len: None,
            },
            DEFAULT_TIMEOUT,
        )?;
        match response.output {
            fs::ChecksumOutput::Numeric(value) => Ok(value as u32),
            fs::ChecksumOutput::Bytes(_) => Err(ExecuteError::InvalidResponse(
                "crc32 checksum is not numeric".to_string(),
            )),
        }
    }

    /// Computes the SHA256 of the file `name` on the device.
    pub fn fs_checksum_sha256(&mut self, name: impl AsRef<str>) -> Result<Vec<u8>, ExecuteError> {
        let response = self.execute(
            &fs::FileChecksum {
                name: name.as_ref(),
                r#type: Some(fs::CHECKSUM_SHA256),
                off: None,
                len: None,
            },
            DEFAULT_TIMEOUT,
        )?;
        match response.output {
            fs::ChecksumOutput::Bytes(bytes) => Ok(bytes.into_vec()),
            fs::ChecksumOutput::Numeric(_) => Err(ExecuteError::InvalidResponse(
                "sha256 checksum is not a byte string".to_string(),
            )),
        }
    }

    /// Lists the checksum types the device supports.
    pub fn fs_supported_checksums(
        &mut self,
    ) -> Result<fs::SupportedChecksumTypesResponse, ExecuteError> {
        self.execute(&fs::SupportedChecksumTypes, DEFAULT_TIMEOUT)
    }

    /// Closes the file handle kept open between chunked transfers.
    pub fn fs_close(&mut self) -> Result<(), ExecuteError> {
        self.execute(&fs::FileClose, FAST_TIMEOUT)?;
        Ok(())
    }

    // --- Stats group ---

    /// Reads one statistics group.
    pub fn stats_read(
        &mut self,
        name: impl AsRef<str>,
    ) -> Result<commands::stats::StatisticsReadResponse, ExecuteError> {
        self.execute(
            &commands::stats::StatisticsRead {
                name: name.as_ref(),
            },
            DEFAULT_TIMEOUT,
        )
    }

    /// Lists all statistics groups.
    pub fn stats_list(&mut self) -> Result<Vec<String>, ExecuteError> {
        self.execute(&commands::stats::StatisticsList, DEFAULT_TIMEOUT)
            .map(|response| response.stat_list)
    }

    // --- Settings group ---

    /// Reads a setting value.
    pub fn setting_read(&mut self, name: impl AsRef<str>) -> Result<Vec<u8>, ExecuteError> {
        self.execute(
            &commands::settings::SettingRead {
                name: name.as_ref(),
                max_size: None,
            },
            DEFAULT_TIMEOUT,
        )
        .map(|response| response.val)
    }

    /// Writes a setting value.
    pub fn setting_write(
        &mut self,
        name: impl AsRef<str>,
        val: &[u8],
    ) -> Result<(), ExecuteError> {
        self.execute(
            &commands::settings::SettingWrite {
                name: name.as_ref(),
                val,
            },
            DEFAULT_TIMEOUT,
        )?;
        Ok(())
    }

    /// Deletes a setting.
    pub fn setting_delete(&mut self, name: impl AsRef<str>) -> Result<(), ExecuteError> {
        self.execute(
            &commands::settings::SettingDelete {
                name: name.as_ref(),
            },
            DEFAULT_TIMEOUT,
        )?;
        Ok(())
    }

    /// Applies pending setting writes.
    pub fn settings_commit(&mut self) -> Result<(), ExecuteError> {
        self.execute(&commands::settings::SettingsCommit, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Reloads settings from persistent storage.
    pub fn settings_load(&mut self) -> Result<(), ExecuteError> {
        self.execute(&commands::settings::SettingsLoad, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Persists the running settings.
    pub fn settings_save(&mut self) -> Result<(), ExecuteError> {
        self.execute(&commands::settings::SettingsSave, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    // --- Logs group ---

    /// Reads log entries.
    pub fn log_show(
        &mut self,
        log_name: Option<&str>,
        index: Option<u64>,
    ) -> Result<commands::logs::LogShowResponse, ExecuteError> {
        self.execute(
            &commands::logs::LogShow {
                log_name,
                ts: None,
                index,
            },
            DEFAULT_TIMEOUT,
        )
    }

    /// Clears all logs.
    pub fn log_clear(&mut self) -> Result<(), ExecuteError> {
        self.execute(&commands::logs::LogClear, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Lists log modules.
    pub fn log_module_list(
        &mut self,
    ) -> Result<commands::logs::LogModuleListResponse, ExecuteError> {
        self.execute(&commands::logs::LogModuleList, DEFAULT_TIMEOUT)
    }

    /// Lists log levels.
    pub fn log_level_list(
        &mut self,
    ) -> Result<commands::logs::LogLevelListResponse, ExecuteError> {
        self.execute(&commands::logs::LogLevelList, DEFAULT_TIMEOUT)
    }

    // --- Crash / Run groups ---

    /// Asks the device to trigger a test crash.
    pub fn crash_test(&mut self) -> Result<(), ExecuteError> {
        self.execute(&commands::crash::CrashTest, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Runs the named test, or all tests when `None`.
    pub fn run_test(
        &mut self,
        testname: Option<&str>,
        token: Option<&str>,
    ) -> Result<(), ExecuteError> {
        self.execute(&commands::run::RunTest { testname, token }, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Lists all registered tests.
    pub fn run_list(&mut self) -> Result<Vec<String>, ExecuteError> {
        self.execute(&commands::run::RunList, DEFAULT_TIMEOUT)
            .map(|response| response.run_list)
    }

    // --- Shell group ---

    /// Executes a shell command line.
    pub fn shell_execute(
        &mut self,
        argv: Vec<&str>,
    ) -> Result<commands::shell::ShellExecuteResponse, ExecuteError> {
        self.execute(&commands::shell::ShellExecute { argv }, DEFAULT_TIMEOUT)
    }

    // --- Basic group ---

    /// Erases the application settings partition.
    pub fn basic_erase_app_settings(&mut self) -> Result<(), ExecuteError> {
        self.execute(&commands::basic::EraseAppSettings, FAST_TIMEOUT)?;
        Ok(())
    }

    // --- SUIT group ---

    /// Lists the roles of all installed SUIT manifests.
    pub fn suit_manifest_list(
        &mut self,
    ) -> Result<Vec<suit::ManifestListEntry>, ExecuteError> {
        self.execute(&suit::ManifestList, DEFAULT_TIMEOUT)
            .map(|response| response.manifests)
    }

    /// Reads the state of the manifest with the given role.
    pub fn suit_manifest_state(
        &mut self,
        role: suit::ManifestRole,
    ) -> Result<suit::ManifestStateResponse, ExecuteError> {
        self.execute(&suit::ManifestState { role }, DEFAULT_TIMEOUT)
    }

    // --- Memfault group ---

    /// Reads the Memfault device info.
    pub fn memfault_device_info(
        &mut self,
    ) -> Result<commands::memfault::DeviceInfoResponse, ExecuteError> {
        self.execute(&commands::memfault::DeviceInfo, DEFAULT_TIMEOUT)
    }

    /// Reads the Memfault project key.
    pub fn memfault_project_key(&mut self) -> Result<String, ExecuteError> {
        self.execute(&commands::memfault::ProjectKey, DEFAULT_TIMEOUT)
            .map(|response| response.project_key)
    }
}
