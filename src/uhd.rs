use crate::config::{ChannelSet, RadioConfig};
use crate::error::RadioError;
use crate::radio::{RadioFrontEnd, RecvOutcome, Sample, SensorValue};
use crate::time::AbsoluteTime;
use std::ffi::CString;
use std::os::raw::{c_char, c_double, c_int, c_void};
use std::ptr;

// UHD C API FFI bindings (manual, minimal)

type UhdError = c_int;
const UHD_ERROR_NONE: UhdError = 0;

type UhdUsrpHandle = *mut c_void;
type UhdRxStreamerHandle = *mut c_void;
type UhdRxMetadataHandle = *mut c_void;
type UhdSubdevSpecHandle = *mut c_void;
type UhdSensorValueHandle = *mut c_void;

const UHD_TUNE_REQUEST_POLICY_AUTO: c_int = 65;

const UHD_STREAM_MODE_START_CONTINUOUS: c_int = 97;
const UHD_STREAM_MODE_STOP_CONTINUOUS: c_int = 111;

const UHD_RX_METADATA_ERROR_CODE_NONE: c_int = 0x0;
const UHD_RX_METADATA_ERROR_CODE_TIMEOUT: c_int = 0x1;
const UHD_RX_METADATA_ERROR_CODE_OVERFLOW: c_int = 0x8;

const UHD_SENSOR_VALUE_BOOLEAN: c_int = 98;
const UHD_SENSOR_VALUE_INTEGER: c_int = 105;

const MBOARD: usize = 0;

#[repr(C)]
struct UhdTuneRequest {
    target_freq: c_double,
    rf_freq_policy: c_int,
    rf_freq: c_double,
    dsp_freq_policy: c_int,
    dsp_freq: c_double,
    args: *mut c_char,
}

#[repr(C)]
struct UhdTuneResult {
    clipped_rf_freq: c_double,
    target_rf_freq: c_double,
    actual_rf_freq: c_double,
    target_dsp_freq: c_double,
    actual_dsp_freq: c_double,
}

#[repr(C)]
struct UhdStreamArgs {
    cpu_format: *mut c_char,
    otw_format: *mut c_char,
    args: *mut c_char,
    channel_list: *mut usize,
    n_channels: c_int,
}

#[repr(C)]
struct UhdStreamCmd {
    stream_mode: c_int,
    num_samps: usize,
    stream_now: bool,
    time_spec_full_secs: i64,
    time_spec_frac_secs: c_double,
}

extern "C" {
    fn uhd_usrp_make(h: *mut UhdUsrpHandle, args: *const c_char) -> UhdError;
    fn uhd_usrp_free(h: *mut UhdUsrpHandle) -> UhdError;
    fn uhd_usrp_get_rx_num_channels(h: UhdUsrpHandle, num_channels_out: *mut usize) -> UhdError;
    fn uhd_usrp_set_clock_source(h: UhdUsrpHandle, clock_source: *const c_char, mboard: usize) -> UhdError;
    fn uhd_usrp_set_time_source(h: UhdUsrpHandle, time_source: *const c_char, mboard: usize) -> UhdError;
    fn uhd_usrp_set_rx_subdev_spec(h: UhdUsrpHandle, subdev_spec: UhdSubdevSpecHandle, mboard: usize) -> UhdError;
    fn uhd_usrp_set_rx_rate(h: UhdUsrpHandle, rate: c_double, chan: usize) -> UhdError;
    fn uhd_usrp_get_rx_rate(h: UhdUsrpHandle, chan: usize, rate_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_rx_freq(
        h: UhdUsrpHandle,
        tune_request: *mut UhdTuneRequest,
        chan: usize,
        tune_result: *mut UhdTuneResult,
    ) -> UhdError;
    fn uhd_usrp_set_rx_dc_offset_enabled(h: UhdUsrpHandle, enb: bool, chan: usize) -> UhdError;
    fn uhd_usrp_set_rx_iq_balance_enabled(h: UhdUsrpHandle, enb: bool, chan: usize) -> UhdError;
    fn uhd_usrp_get_time_now(h: UhdUsrpHandle, mboard: usize, full_secs_out: *mut i64, frac_secs_out: *mut c_double) -> UhdError;
    fn uhd_usrp_get_time_last_pps(h: UhdUsrpHandle, mboard: usize, full_secs_out: *mut i64, frac_secs_out: *mut c_double) -> UhdError;
    fn uhd_usrp_set_time_now(h: UhdUsrpHandle, full_secs: i64, frac_secs: c_double, mboard: usize) -> UhdError;
    fn uhd_usrp_set_time_next_pps(h: UhdUsrpHandle, full_secs: i64, frac_secs: c_double, mboard: usize) -> UhdError;
    fn uhd_usrp_get_mboard_sensor(
        h: UhdUsrpHandle,
        name: *const c_char,
        mboard: usize,
        sensor_value_out: *mut UhdSensorValueHandle,
    ) -> UhdError;
    fn uhd_usrp_get_rx_stream(h: UhdUsrpHandle, stream_args: *mut UhdStreamArgs, h_out: UhdRxStreamerHandle) -> UhdError;

    fn uhd_subdev_spec_make(h: *mut UhdSubdevSpecHandle, markup: *const c_char) -> UhdError;
    fn uhd_subdev_spec_free(h: *mut UhdSubdevSpecHandle) -> UhdError;

    fn uhd_sensor_value_make(h: *mut UhdSensorValueHandle) -> UhdError;
    fn uhd_sensor_value_free(h: *mut UhdSensorValueHandle) -> UhdError;
    fn uhd_sensor_value_data_type(h: UhdSensorValueHandle, data_type_out: *mut c_int) -> UhdError;
    fn uhd_sensor_value_to_bool(h: UhdSensorValueHandle, value_out: *mut bool) -> UhdError;
    fn uhd_sensor_value_to_int(h: UhdSensorValueHandle, value_out: *mut c_int) -> UhdError;

    fn uhd_rx_streamer_make(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_free(h: *mut UhdRxStreamerHandle) -> UhdError;
    fn uhd_rx_streamer_max_num_samps(h: UhdRxStreamerHandle, max_num_samps_out: *mut usize) -> UhdError;
    fn uhd_rx_streamer_recv(
        h: UhdRxStreamerHandle,
        buffs: *mut *mut c_void,
        samps_per_buff: usize,
        md: *mut UhdRxMetadataHandle,
        timeout: c_double,
        one_packet: bool,
        items_recvd: *mut usize,
    ) -> UhdError;
    fn uhd_rx_streamer_issue_stream_cmd(h: UhdRxStreamerHandle, stream_cmd: *const UhdStreamCmd) -> UhdError;

    fn uhd_rx_metadata_make(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_free(handle: *mut UhdRxMetadataHandle) -> UhdError;
    fn uhd_rx_metadata_error_code(h: UhdRxMetadataHandle, error_code_out: *mut c_int) -> UhdError;
    fn uhd_rx_metadata_has_time_spec(h: UhdRxMetadataHandle, result_out: *mut bool) -> UhdError;
    fn uhd_rx_metadata_time_spec(h: UhdRxMetadataHandle, full_secs_out: *mut i64, frac_secs_out: *mut c_double) -> UhdError;
    fn uhd_rx_metadata_out_of_sequence(h: UhdRxMetadataHandle, result_out: *mut bool) -> UhdError;
}

fn check(call: &'static str, code: UhdError) -> Result<(), RadioError> {
    if code == UHD_ERROR_NONE {
        Ok(())
    } else {
        Err(RadioError::Driver { call, code })
    }
}

fn c_string(value: &str) -> Result<CString, RadioError> {
    CString::new(value).map_err(|e| RadioError::InvalidArgument(format!("'{}': {}", value, e)))
}

/// A USRP opened through the UHD C API.
pub struct UhdRadio {
    usrp: UhdUsrpHandle,
    rx_handle: UhdRxStreamerHandle,
    md: UhdRxMetadataHandle,
    num_channels: usize,
    open_channels: usize,
    max_samps: usize,
    recv_timeout: f64,
    streaming: bool,
    overflow_count: u64,
}

// The handles are only ever used by the thread that owns the radio.
unsafe impl Send for UhdRadio {}

impl UhdRadio {
    /// Opens the device and applies the subdevice spec, references, rate,
    /// front-end correctors and tuning to every channel.
    pub fn open(cfg: &RadioConfig) -> Result<Self, RadioError> {
        let dev_args = c_string(&cfg.device_args)?;
        let rate_hz = cfg
            .device_rate_hz()
            .map_err(|e| RadioError::InvalidArgument(e.to_string()))?;
        let mut radio = UhdRadio {
            usrp: ptr::null_mut(),
            rx_handle: ptr::null_mut(),
            md: ptr::null_mut(),
            num_channels: 0,
            open_channels: 0,
            max_samps: 0,
            recv_timeout: cfg.recv_timeout_secs,
            streaming: false,
            overflow_count: 0,
        };

        tracing::info!("opening USRP with args '{}'", cfg.device_args);
        unsafe {
            check("uhd_usrp_make", uhd_usrp_make(&mut radio.usrp, dev_args.as_ptr()))?;

            let markup = c_string(&cfg.subdevice_spec)?;
            let mut spec: UhdSubdevSpecHandle = ptr::null_mut();
            check("uhd_subdev_spec_make", uhd_subdev_spec_make(&mut spec, markup.as_ptr()))?;
            let applied = uhd_usrp_set_rx_subdev_spec(radio.usrp, spec, MBOARD);
            uhd_subdev_spec_free(&mut spec);
            check("uhd_usrp_set_rx_subdev_spec", applied)?;

            let clock_source = c_string(cfg.clock_reference.as_str())?;
            check(
                "uhd_usrp_set_clock_source",
                uhd_usrp_set_clock_source(radio.usrp, clock_source.as_ptr(), MBOARD),
            )?;
            if let Some(source) = cfg.time_reference.source() {
                let time_source = c_string(source)?;
                check(
                    "uhd_usrp_set_time_source",
                    uhd_usrp_set_time_source(radio.usrp, time_source.as_ptr(), MBOARD),
                )?;
            }

            check(
                "uhd_usrp_get_rx_num_channels",
                uhd_usrp_get_rx_num_channels(radio.usrp, &mut radio.num_channels),
            )?;

            for chan in 0..radio.num_channels {
                check("uhd_usrp_set_rx_rate", uhd_usrp_set_rx_rate(radio.usrp, rate_hz, chan))?;
                let mut actual: c_double = 0.0;
                check("uhd_usrp_get_rx_rate", uhd_usrp_get_rx_rate(radio.usrp, chan, &mut actual))?;
                if actual != rate_hz {
                    tracing::warn!(
                        "channel {}: requested {} sps, device runs at {} sps",
                        chan,
                        rate_hz,
                        actual
                    );
                }

                check(
                    "uhd_usrp_set_rx_dc_offset_enabled",
                    uhd_usrp_set_rx_dc_offset_enabled(radio.usrp, true, chan),
                )?;
                check(
                    "uhd_usrp_set_rx_iq_balance_enabled",
                    uhd_usrp_set_rx_iq_balance_enabled(radio.usrp, true, chan),
                )?;

                let mut tune_req = UhdTuneRequest {
                    target_freq: cfg.center_freq,
                    rf_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
                    rf_freq: 0.0,
                    dsp_freq_policy: UHD_TUNE_REQUEST_POLICY_AUTO,
                    dsp_freq: 0.0,
                    args: ptr::null_mut(),
                };
                let mut tune_result = UhdTuneResult {
                    clipped_rf_freq: 0.0,
                    target_rf_freq: 0.0,
                    actual_rf_freq: 0.0,
                    target_dsp_freq: 0.0,
                    actual_dsp_freq: 0.0,
                };
                check(
                    "uhd_usrp_set_rx_freq",
                    uhd_usrp_set_rx_freq(radio.usrp, &mut tune_req, chan, &mut tune_result),
                )?;
                tracing::info!(
                    "channel {} tuned: RF={:.3} MHz, DSP={:.3} kHz",
                    chan,
                    tune_result.actual_rf_freq / 1e6,
                    tune_result.actual_dsp_freq / 1e3
                );
            }
        }

        tracing::info!(
            "USRP ready: {} channel(s), clock {}, time {}",
            radio.num_channels,
            cfg.clock_reference,
            cfg.time_reference
        );
        Ok(radio)
    }

    fn read_time(
        &self,
        call: &'static str,
        f: unsafe extern "C" fn(UhdUsrpHandle, usize, *mut i64, *mut c_double) -> UhdError,
    ) -> Result<AbsoluteTime, RadioError> {
        let mut full: i64 = 0;
        let mut frac: c_double = 0.0;
        unsafe { check(call, f(self.usrp, MBOARD, &mut full, &mut frac))? };
        Ok(AbsoluteTime::from_parts(full, frac))
    }

    fn stream_cmd(&mut self, mode: c_int, at: Option<AbsoluteTime>) -> Result<(), RadioError> {
        if self.rx_handle.is_null() {
            return Err(RadioError::StreamNotOpen);
        }
        let cmd = UhdStreamCmd {
            stream_mode: mode,
            num_samps: 0,
            stream_now: at.is_none(),
            time_spec_full_secs: at.map(|t| t.whole_secs()).unwrap_or(0),
            time_spec_frac_secs: at.map(|t| t.frac_secs()).unwrap_or(0.0),
        };
        unsafe { check("uhd_rx_streamer_issue_stream_cmd", uhd_rx_streamer_issue_stream_cmd(self.rx_handle, &cmd)) }
    }

    fn read_metadata(&self, num_rx: usize) -> Result<MetadataReading, RadioError> {
        let mut reading = MetadataReading {
            error_code: 0,
            time: None,
            out_of_sequence: false,
        };
        unsafe {
            check(
                "uhd_rx_metadata_error_code",
                uhd_rx_metadata_error_code(self.md, &mut reading.error_code),
            )?;
            match reading.error_code {
                UHD_RX_METADATA_ERROR_CODE_NONE if num_rx > 0 => {
                    let mut has_time = false;
                    check(
                        "uhd_rx_metadata_has_time_spec",
                        uhd_rx_metadata_has_time_spec(self.md, &mut has_time),
                    )?;
                    if has_time {
                        let mut full: i64 = 0;
                        let mut frac: c_double = 0.0;
                        check(
                            "uhd_rx_metadata_time_spec",
                            uhd_rx_metadata_time_spec(self.md, &mut full, &mut frac),
                        )?;
                        reading.time = Some(AbsoluteTime::from_parts(full, frac));
                    }
                }
                UHD_RX_METADATA_ERROR_CODE_OVERFLOW => {
                    check(
                        "uhd_rx_metadata_out_of_sequence",
                        uhd_rx_metadata_out_of_sequence(self.md, &mut reading.out_of_sequence),
                    )?;
                }
                _ => {}
            }
        }
        Ok(reading)
    }
}

impl RadioFrontEnd for UhdRadio {
    fn channel_count(&self) -> usize {
        self.num_channels
    }

    fn open_stream(&mut self, channels: &ChannelSet) -> Result<usize, RadioError> {
        let cpu_fmt = c_string("sc16")?;
        let otw_fmt = c_string("sc16")?;
        let stream_args_str = c_string("")?;
        let mut channel_list: Vec<usize> = channels.as_slice().to_vec();

        unsafe {
            check("uhd_rx_streamer_make", uhd_rx_streamer_make(&mut self.rx_handle))?;
            check("uhd_rx_metadata_make", uhd_rx_metadata_make(&mut self.md))?;

            let mut stream_args = UhdStreamArgs {
                cpu_format: cpu_fmt.as_ptr() as *mut c_char,
                otw_format: otw_fmt.as_ptr() as *mut c_char,
                args: stream_args_str.as_ptr() as *mut c_char,
                channel_list: channel_list.as_mut_ptr(),
                n_channels: channel_list.len() as c_int,
            };
            check(
                "uhd_usrp_get_rx_stream",
                uhd_usrp_get_rx_stream(self.usrp, &mut stream_args, self.rx_handle),
            )?;
            check(
                "uhd_rx_streamer_max_num_samps",
                uhd_rx_streamer_max_num_samps(self.rx_handle, &mut self.max_samps),
            )?;
        }

        self.open_channels = channel_list.len();
        tracing::info!("rx stream open on {:?}, max_num_samps {}", channel_list, self.max_samps);
        Ok(self.max_samps)
    }

    fn current_time(&self) -> Result<AbsoluteTime, RadioError> {
        self.read_time("uhd_usrp_get_time_now", uhd_usrp_get_time_now)
    }

    fn last_pulse_time(&self) -> Result<AbsoluteTime, RadioError> {
        self.read_time("uhd_usrp_get_time_last_pps", uhd_usrp_get_time_last_pps)
    }

    fn set_time(&mut self, time: AbsoluteTime) -> Result<(), RadioError> {
        unsafe {
            check(
                "uhd_usrp_set_time_now",
                uhd_usrp_set_time_now(self.usrp, time.whole_secs(), time.frac_secs(), MBOARD),
            )
        }
    }

    fn set_time_at_next_pulse(&mut self, time: AbsoluteTime) -> Result<(), RadioError> {
        unsafe {
            check(
                "uhd_usrp_set_time_next_pps",
                uhd_usrp_set_time_next_pps(self.usrp, time.whole_secs(), time.frac_secs(), MBOARD),
            )
        }
    }

    fn sensor(&self, name: &str) -> Result<SensorValue, RadioError> {
        let c_name = c_string(name)?;
        let sensor_err = |reason: &str| RadioError::Sensor {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        unsafe {
            let mut value: UhdSensorValueHandle = ptr::null_mut();
            check("uhd_sensor_value_make", uhd_sensor_value_make(&mut value))?;

            let result = (|| -> Result<SensorValue, RadioError> {
                check(
                    "uhd_usrp_get_mboard_sensor",
                    uhd_usrp_get_mboard_sensor(self.usrp, c_name.as_ptr(), MBOARD, &mut value),
                )?;
                let mut data_type: c_int = 0;
                check("uhd_sensor_value_data_type", uhd_sensor_value_data_type(value, &mut data_type))?;
                match data_type {
                    UHD_SENSOR_VALUE_BOOLEAN => {
                        let mut b = false;
                        check("uhd_sensor_value_to_bool", uhd_sensor_value_to_bool(value, &mut b))?;
                        Ok(SensorValue::Bool(b))
                    }
                    UHD_SENSOR_VALUE_INTEGER => {
                        let mut i: c_int = 0;
                        check("uhd_sensor_value_to_int", uhd_sensor_value_to_int(value, &mut i))?;
                        Ok(SensorValue::Int(i as i64))
                    }
                    other => Err(sensor_err(&format!("unsupported data type {}", other))),
                }
            })();

            uhd_sensor_value_free(&mut value);
            result
        }
    }

    fn issue_stream_start(&mut self, at: AbsoluteTime) -> Result<(), RadioError> {
        self.stream_cmd(UHD_STREAM_MODE_START_CONTINUOUS, Some(at))?;
        self.streaming = true;
        Ok(())
    }

    fn issue_stream_stop(&mut self) -> Result<(), RadioError> {
        self.stream_cmd(UHD_STREAM_MODE_STOP_CONTINUOUS, None)?;
        self.streaming = false;
        Ok(())
    }

    fn receive(&mut self, buffers: &mut [Vec<Sample>], max_samples: usize) -> RecvOutcome {
        if self.rx_handle.is_null() || buffers.len() != self.open_channels {
            return RecvOutcome::Error(format!(
                "{} buffers for {} open channels",
                buffers.len(),
                self.open_channels
            ));
        }
        let samps = buffers
            .iter()
            .map(Vec::len)
            .min()
            .unwrap_or(0)
            .min(max_samples);
        let mut ptrs: Vec<*mut c_void> = buffers.iter_mut().map(|b| b.as_mut_ptr() as *mut c_void).collect();
        let mut num_rx: usize = 0;

        unsafe {
            let err = uhd_rx_streamer_recv(
                self.rx_handle,
                ptrs.as_mut_ptr(),
                samps,
                &mut self.md,
                self.recv_timeout,
                false,
                &mut num_rx,
            );
            if err != UHD_ERROR_NONE {
                return RecvOutcome::Error(format!("uhd_rx_streamer_recv failed: error {}", err));
            }
        }

        let reading = self.read_metadata(num_rx);
        if let Ok(r) = &reading {
            if r.error_code == UHD_RX_METADATA_ERROR_CODE_OVERFLOW {
                self.overflow_count += 1;
            }
        }
        outcome_from_metadata(num_rx, reading)
    }
}

/// Metadata fields read back after one receive call.
#[derive(Debug, Clone, Copy)]
struct MetadataReading {
    error_code: c_int,
    time: Option<AbsoluteTime>,
    out_of_sequence: bool,
}

fn outcome_from_metadata(num_rx: usize, reading: Result<MetadataReading, RadioError>) -> RecvOutcome {
    let reading = match reading {
        Ok(reading) => reading,
        Err(e) => return RecvOutcome::Error(format!("reading rx metadata: {}", e)),
    };
    match reading.error_code {
        UHD_RX_METADATA_ERROR_CODE_NONE => RecvOutcome::Samples {
            count: num_rx,
            time: reading.time,
        },
        UHD_RX_METADATA_ERROR_CODE_TIMEOUT => RecvOutcome::Timeout,
        UHD_RX_METADATA_ERROR_CODE_OVERFLOW => RecvOutcome::Overflow {
            out_of_sequence: reading.out_of_sequence,
        },
        other => RecvOutcome::Error(format!("rx metadata error code {:#x}", other)),
    }
}

impl Drop for UhdRadio {
    fn drop(&mut self) {
        unsafe {
            if !self.rx_handle.is_null() {
                if self.streaming {
                    let stop_cmd = UhdStreamCmd {
                        stream_mode: UHD_STREAM_MODE_STOP_CONTINUOUS,
                        num_samps: 0,
                        stream_now: true,
                        time_spec_full_secs: 0,
                        time_spec_frac_secs: 0.0,
                    };
                    let _ = uhd_rx_streamer_issue_stream_cmd(self.rx_handle, &stop_cmd);
                }
                uhd_rx_streamer_free(&mut self.rx_handle);
            }
            if !self.md.is_null() {
                uhd_rx_metadata_free(&mut self.md);
            }
            if !self.usrp.is_null() {
                uhd_usrp_free(&mut self.usrp);
            }
        }

        if self.overflow_count > 0 {
            tracing::warn!("USRP: {} overflows during capture", self.overflow_count);
        }
    }
}
