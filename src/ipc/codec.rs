//! Binary wire codec
//!
//! Frames are `u32 length · i32 serializer id · payload`, all little-endian.
//! Object payloads are `u16 field_count` followed by `u16 id · u32 size · value`
//! entries; unknown ids are skipped by size.

use crate::models::{
    CommandLineOption, CommandLineOptionMessages, DiscoveredTest, DiscoveredTestMessages,
    FileArtifact, FileArtifactMessages, Handshake, HostErrorMessage, InvalidEnumValue, Module,
    SessionEvent, SessionType, TestResult, TestResultDetails, TestResultMessages, TestState,
};
use bytes::{BufMut, BytesMut};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Largest frame accepted from a peer
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Bytes of the serializer id that follow the length prefix
pub const SERIALIZER_ID_SIZE: usize = 4;

/// Malformed or unexpected data on the wire
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Frame too short: {0} bytes")]
    FrameTooShort(u32),

    #[error("Frame too large: {size} bytes (max {max})", max = MAX_FRAME_SIZE)]
    FrameTooLarge { size: usize },

    #[error("Invalid UTF-8 in field {field}")]
    InvalidUtf8 { field: u16 },

    #[error("Invalid size {size} for field {field}")]
    InvalidFieldSize { field: u16, size: usize },

    #[error("Missing field {field} in {message}")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },

    #[error(transparent)]
    InvalidEnum(#[from] InvalidEnumValue),

    #[error("Expected handshake, received {0}")]
    HandshakeRequired(&'static str),

    #[error("Unsupported protocol versions: {0}")]
    UnsupportedVersion(String),
}

/// Builds one object payload
#[derive(Default)]
pub struct ObjectWriter {
    fields: u16,
    buf: BytesMut,
}

impl ObjectWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn field(&mut self, id: u16, value: &[u8]) -> &mut Self {
        self.fields += 1;
        self.buf.put_u16_le(id);
        self.buf.put_u32_le(value.len() as u32);
        self.buf.extend_from_slice(value);
        self
    }

    pub fn string(&mut self, id: u16, value: &str) -> &mut Self {
        self.field(id, value.as_bytes())
    }

    pub fn opt_string(&mut self, id: u16, value: Option<&str>) -> &mut Self {
        match value {
            Some(value) => self.string(id, value),
            None => self,
        }
    }

    pub fn byte(&mut self, id: u16, value: u8) -> &mut Self {
        self.field(id, &[value])
    }

    pub fn bool(&mut self, id: u16, value: bool) -> &mut Self {
        self.byte(id, u8::from(value))
    }

    pub fn long(&mut self, id: u16, value: i64) -> &mut Self {
        self.field(id, &value.to_le_bytes())
    }

    /// Empty lists are omitted entirely
    pub fn list<T>(
        &mut self,
        id: u16,
        items: &[T],
        mut write: impl FnMut(&T, &mut ObjectWriter),
    ) -> &mut Self {
        if items.is_empty() {
            return self;
        }
        let mut value = BytesMut::new();
        value.put_u32_le(items.len() as u32);
        for item in items {
            let mut nested = ObjectWriter::new();
            write(item, &mut nested);
            nested.finish(&mut value);
        }
        self.field(id, &value)
    }

    pub fn finish(self, out: &mut BytesMut) {
        out.put_u16_le(self.fields);
        out.extend_from_slice(&self.buf);
    }
}

/// Bounds-checked cursor over a payload
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if n > self.buf.len() {
            return Err(ProtocolError::Truncated {
                needed: n,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Visit every field of one object; values are already bounded by their size
    pub fn fields(
        &mut self,
        mut visit: impl FnMut(u16, &'a [u8]) -> Result<(), ProtocolError>,
    ) -> Result<(), ProtocolError> {
        let count = self.u16()?;
        for _ in 0..count {
            let id = self.u16()?;
            let size = self.u32()? as usize;
            let value = self.take(size)?;
            visit(id, value)?;
        }
        Ok(())
    }
}

fn string_value(field: u16, value: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(value.to_vec()).map_err(|_| ProtocolError::InvalidUtf8 { field })
}

fn byte_value(field: u16, value: &[u8]) -> Result<u8, ProtocolError> {
    match value {
        [b] => Ok(*b),
        _ => Err(ProtocolError::InvalidFieldSize {
            field,
            size: value.len(),
        }),
    }
}

fn bool_value(field: u16, value: &[u8]) -> Result<bool, ProtocolError> {
    Ok(byte_value(field, value)? != 0)
}

fn long_value(field: u16, value: &[u8]) -> Result<i64, ProtocolError> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| ProtocolError::InvalidFieldSize {
            field,
            size: value.len(),
        })?;
    Ok(i64::from_le_bytes(bytes))
}

fn list_value<'a, T>(
    value: &'a [u8],
    mut item: impl FnMut(&mut Reader<'a>) -> Result<T, ProtocolError>,
) -> Result<Vec<T>, ProtocolError> {
    let mut reader = Reader::new(value);
    let count = reader.u32()? as usize;
    // Each nested object is at least its u16 field count
    let mut items = Vec::with_capacity(count.min(reader.remaining() / 2));
    for _ in 0..count {
        items.push(item(&mut reader)?);
    }
    Ok(items)
}

fn required<T>(
    value: Option<T>,
    message: &'static str,
    field: &'static str,
) -> Result<T, ProtocolError> {
    value.ok_or(ProtocolError::MissingField { message, field })
}

/// A payload type with a registered serializer id
pub trait WireMessage: Sized {
    const SERIALIZER_ID: i32;

    fn encode(&self, out: &mut BytesMut);

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError>;
}

/// Registered serializer ids
pub mod serializer_id {
    pub const VOID: i32 = 0;
    pub const ERROR: i32 = 2;
    pub const COMMAND_LINE_OPTIONS: i32 = 3;
    pub const MODULE: i32 = 4;
    pub const DISCOVERED_TESTS: i32 = 5;
    pub const TEST_RESULTS: i32 = 6;
    pub const FILE_ARTIFACTS: i32 = 7;
    pub const SESSION_EVENT: i32 = 8;
    pub const HANDSHAKE: i32 = 9;
}

impl WireMessage for Handshake {
    const SERIALIZER_ID: i32 = serializer_id::HANDSHAKE;

    fn encode(&self, out: &mut BytesMut) {
        out.put_u16_le(self.properties.len() as u16);
        for (key, value) in &self.properties {
            out.put_u8(*key);
            out.put_u32_le(value.len() as u32);
            out.extend_from_slice(value.as_bytes());
        }
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(payload);
        let count = reader.u16()?;
        let mut properties = BTreeMap::new();
        for _ in 0..count {
            let key = reader.u8()?;
            let len = reader.u32()? as usize;
            let value = string_value(u16::from(key), reader.take(len)?)?;
            properties.insert(key, value);
        }
        Ok(Handshake { properties })
    }
}

impl WireMessage for CommandLineOptionMessages {
    const SERIALIZER_ID: i32 = serializer_id::COMMAND_LINE_OPTIONS;

    fn encode(&self, out: &mut BytesMut) {
        let mut writer = ObjectWriter::new();
        writer
            .opt_string(1, self.module_path.as_deref())
            .list(2, &self.options, |option, w| {
                w.string(1, &option.name)
                    .string(2, &option.description)
                    .bool(3, option.is_hidden)
                    .bool(4, option.is_built_in);
            });
        writer.finish(out);
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut message = CommandLineOptionMessages::default();
        Reader::new(payload).fields(|id, value| {
            match id {
                1 => message.module_path = Some(string_value(id, value)?),
                2 => {
                    message.options = list_value(value, |reader| {
                        let mut name = None;
                        let mut description = String::new();
                        let mut is_hidden = false;
                        let mut is_built_in = false;
                        reader.fields(|id, value| {
                            match id {
                                1 => name = Some(string_value(id, value)?),
                                2 => description = string_value(id, value)?,
                                3 => is_hidden = bool_value(id, value)?,
                                4 => is_built_in = bool_value(id, value)?,
                                _ => {}
                            }
                            Ok(())
                        })?;
                        Ok(CommandLineOption {
                            name: required(name, "CommandLineOption", "Name")?,
                            description,
                            is_hidden,
                            is_built_in,
                        })
                    })?
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(message)
    }
}

fn path_string(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

impl WireMessage for Module {
    const SERIALIZER_ID: i32 = serializer_id::MODULE;

    fn encode(&self, out: &mut BytesMut) {
        let mut writer = ObjectWriter::new();
        writer
            .string(1, &path_string(&self.binary_path))
            .opt_string(2, self.project_path.as_deref().map(path_string).as_deref())
            .opt_string(3, self.target_framework.as_deref())
            .opt_string(4, self.run_settings_path.as_deref().map(path_string).as_deref())
            .bool(5, self.is_test_host_capable)
            .bool(6, self.is_test_project)
            .opt_string(7, self.working_directory.as_deref().map(path_string).as_deref());
        let environment: Vec<_> = self.environment.iter().collect();
        writer
            .list(8, &environment, |(key, value), w| {
                w.string(1, key).string(2, value);
            })
            .list(9, &self.launch_arguments, |arg, w| {
                w.string(1, arg);
            });
        writer.finish(out);
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut binary_path = None;
        let mut module = Module::new(PathBuf::new());
        Reader::new(payload).fields(|id, value| {
            match id {
                1 => binary_path = Some(PathBuf::from(string_value(id, value)?)),
                2 => module.project_path = Some(PathBuf::from(string_value(id, value)?)),
                3 => module.target_framework = Some(string_value(id, value)?),
                4 => module.run_settings_path = Some(PathBuf::from(string_value(id, value)?)),
                5 => module.is_test_host_capable = bool_value(id, value)?,
                6 => module.is_test_project = bool_value(id, value)?,
                7 => module.working_directory = Some(PathBuf::from(string_value(id, value)?)),
                8 => {
                    for (key, value) in list_value(value, environment_entry)? {
                        module.environment.insert(key, value);
                    }
                }
                9 => {
                    module.launch_arguments = list_value(value, |reader| {
                        let mut arg = None;
                        reader.fields(|id, value| {
                            if id == 1 {
                                arg = Some(string_value(id, value)?);
                            }
                            Ok(())
                        })?;
                        required(arg, "Module", "LaunchArgument")
                    })?
                }
                _ => {}
            }
            Ok(())
        })?;
        module.binary_path = required(binary_path, "Module", "BinaryPath")?;
        Ok(module)
    }
}

fn environment_entry(reader: &mut Reader<'_>) -> Result<(String, String), ProtocolError> {
    let mut key = None;
    let mut entry = String::new();
    reader.fields(|id, value| {
        match id {
            1 => key = Some(string_value(id, value)?),
            2 => entry = string_value(id, value)?,
            _ => {}
        }
        Ok(())
    })?;
    Ok((required(key, "Module", "EnvironmentVariableName")?, entry))
}

impl WireMessage for DiscoveredTestMessages {
    const SERIALIZER_ID: i32 = serializer_id::DISCOVERED_TESTS;

    fn encode(&self, out: &mut BytesMut) {
        let mut writer = ObjectWriter::new();
        writer
            .opt_string(1, self.execution_id.as_deref())
            .list(2, &self.tests, |test, w| {
                w.string(1, &test.uid).string(2, &test.display_name);
            });
        writer.finish(out);
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut message = DiscoveredTestMessages::default();
        Reader::new(payload).fields(|id, value| {
            match id {
                1 => message.execution_id = Some(string_value(id, value)?),
                2 => {
                    message.tests = list_value(value, |reader| {
                        let mut uid = None;
                        let mut display_name = None;
                        reader.fields(|id, value| {
                            match id {
                                1 => uid = Some(string_value(id, value)?),
                                2 => display_name = Some(string_value(id, value)?),
                                _ => {}
                            }
                            Ok(())
                        })?;
                        let uid = required(uid, "DiscoveredTest", "Uid")?;
                        Ok(DiscoveredTest {
                            display_name: display_name.unwrap_or_else(|| uid.clone()),
                            uid,
                        })
                    })?
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(message)
    }
}

mod result_field {
    pub const UID: u16 = 1;
    pub const DISPLAY_NAME: u16 = 2;
    pub const STATE: u16 = 3;
    pub const DURATION: u16 = 4;
    pub const REASON: u16 = 5;

    pub const SUCCESSFUL_STDOUT: u16 = 6;
    pub const SUCCESSFUL_STDERR: u16 = 7;
    pub const SUCCESSFUL_SESSION_UID: u16 = 8;

    pub const FAILED_ERROR_MESSAGE: u16 = 6;
    pub const FAILED_ERROR_STACK_TRACE: u16 = 7;
    pub const FAILED_STDOUT: u16 = 8;
    pub const FAILED_STDERR: u16 = 9;
    pub const FAILED_SESSION_UID: u16 = 10;
}

fn write_common(details: &TestResultDetails, w: &mut ObjectWriter) {
    w.string(result_field::UID, &details.uid)
        .string(result_field::DISPLAY_NAME, &details.display_name)
        .byte(result_field::STATE, details.state.wire_value())
        .long(result_field::DURATION, details.duration_ticks)
        .opt_string(result_field::REASON, details.reason.as_deref());
}

#[derive(Default)]
struct PartialResult {
    uid: Option<String>,
    display_name: Option<String>,
    state: Option<TestState>,
    duration_ticks: i64,
    reason: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    session_uid: Option<String>,
    error_message: Option<String>,
    error_stack_trace: Option<String>,
}

impl PartialResult {
    /// Fields shared by both lists; returns false when the id is list-specific
    fn common(&mut self, id: u16, value: &[u8]) -> Result<bool, ProtocolError> {
        match id {
            result_field::UID => self.uid = Some(string_value(id, value)?),
            result_field::DISPLAY_NAME => self.display_name = Some(string_value(id, value)?),
            result_field::STATE => self.state = Some(TestState::try_from(byte_value(id, value)?)?),
            result_field::DURATION => self.duration_ticks = long_value(id, value)?,
            result_field::REASON => self.reason = Some(string_value(id, value)?),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn into_details(self, message: &'static str) -> Result<TestResultDetails, ProtocolError> {
        let uid = required(self.uid, message, "Uid")?;
        Ok(TestResultDetails {
            display_name: self.display_name.unwrap_or_else(|| uid.clone()),
            uid,
            state: required(self.state, message, "State")?,
            duration_ticks: self.duration_ticks,
            reason: self.reason,
            stdout: self.stdout,
            stderr: self.stderr,
            session_uid: self.session_uid,
        })
    }
}

impl WireMessage for TestResultMessages {
    const SERIALIZER_ID: i32 = serializer_id::TEST_RESULTS;

    fn encode(&self, out: &mut BytesMut) {
        let successful: Vec<&TestResultDetails> = self.successful().collect();
        let failed: Vec<&TestResult> = self.failed().collect();

        let mut writer = ObjectWriter::new();
        writer
            .opt_string(1, self.execution_id.as_deref())
            .list(2, &successful, |details, w| {
                write_common(details, w);
                w.opt_string(result_field::SUCCESSFUL_STDOUT, details.stdout.as_deref())
                    .opt_string(result_field::SUCCESSFUL_STDERR, details.stderr.as_deref())
                    .opt_string(
                        result_field::SUCCESSFUL_SESSION_UID,
                        details.session_uid.as_deref(),
                    );
            })
            .list(3, &failed, |result, w| {
                let details = result.details();
                write_common(details, w);
                if let TestResult::Failed {
                    error_message,
                    error_stack_trace,
                    ..
                } = result
                {
                    w.opt_string(result_field::FAILED_ERROR_MESSAGE, error_message.as_deref())
                        .opt_string(
                            result_field::FAILED_ERROR_STACK_TRACE,
                            error_stack_trace.as_deref(),
                        );
                }
                w.opt_string(result_field::FAILED_STDOUT, details.stdout.as_deref())
                    .opt_string(result_field::FAILED_STDERR, details.stderr.as_deref())
                    .opt_string(result_field::FAILED_SESSION_UID, details.session_uid.as_deref());
            });
        writer.finish(out);
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut message = TestResultMessages::default();
        let mut successful = Vec::new();
        let mut failed = Vec::new();

        Reader::new(payload).fields(|id, value| {
            match id {
                1 => message.execution_id = Some(string_value(id, value)?),
                2 => {
                    successful = list_value(value, |reader| {
                        let mut partial = PartialResult::default();
                        reader.fields(|id, value| {
                            if !partial.common(id, value)? {
                                match id {
                                    result_field::SUCCESSFUL_STDOUT => {
                                        partial.stdout = Some(string_value(id, value)?)
                                    }
                                    result_field::SUCCESSFUL_STDERR => {
                                        partial.stderr = Some(string_value(id, value)?)
                                    }
                                    result_field::SUCCESSFUL_SESSION_UID => {
                                        partial.session_uid = Some(string_value(id, value)?)
                                    }
                                    _ => {}
                                }
                            }
                            Ok(())
                        })?;
                        Ok(TestResult::Successful(
                            partial.into_details("SuccessfulTestResult")?,
                        ))
                    })?
                }
                3 => {
                    failed = list_value(value, |reader| {
                        let mut partial = PartialResult::default();
                        reader.fields(|id, value| {
                            if !partial.common(id, value)? {
                                match id {
                                    result_field::FAILED_ERROR_MESSAGE => {
                                        partial.error_message = Some(string_value(id, value)?)
                                    }
                                    result_field::FAILED_ERROR_STACK_TRACE => {
                                        partial.error_stack_trace = Some(string_value(id, value)?)
                                    }
                                    result_field::FAILED_STDOUT => {
                                        partial.stdout = Some(string_value(id, value)?)
                                    }
                                    result_field::FAILED_STDERR => {
                                        partial.stderr = Some(string_value(id, value)?)
                                    }
                                    result_field::FAILED_SESSION_UID => {
                                        partial.session_uid = Some(string_value(id, value)?)
                                    }
                                    _ => {}
                                }
                            }
                            Ok(())
                        })?;
                        let error_message = partial.error_message.take();
                        let error_stack_trace = partial.error_stack_trace.take();
                        Ok(TestResult::Failed {
                            details: partial.into_details("FailedTestResult")?,
                            error_message,
                            error_stack_trace,
                        })
                    })?
                }
                _ => {}
            }
            Ok(())
        })?;

        successful.append(&mut failed);
        message.results = successful;
        Ok(message)
    }
}

impl WireMessage for FileArtifactMessages {
    const SERIALIZER_ID: i32 = serializer_id::FILE_ARTIFACTS;

    fn encode(&self, out: &mut BytesMut) {
        let mut writer = ObjectWriter::new();
        writer
            .opt_string(1, self.execution_id.as_deref())
            .list(2, &self.artifacts, |artifact, w| {
                w.string(1, &artifact.full_path)
                    .opt_string(2, artifact.display_name.as_deref())
                    .opt_string(3, artifact.description.as_deref())
                    .opt_string(4, artifact.test_uid.as_deref())
                    .opt_string(5, artifact.test_display_name.as_deref())
                    .opt_string(6, artifact.session_uid.as_deref());
            });
        writer.finish(out);
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut message = FileArtifactMessages::default();
        Reader::new(payload).fields(|id, value| {
            match id {
                1 => message.execution_id = Some(string_value(id, value)?),
                2 => {
                    message.artifacts = list_value(value, |reader| {
                        let mut full_path = None;
                        let mut artifact = FileArtifact::new(String::new());
                        reader.fields(|id, value| {
                            match id {
                                1 => full_path = Some(string_value(id, value)?),
                                2 => artifact.display_name = Some(string_value(id, value)?),
                                3 => artifact.description = Some(string_value(id, value)?),
                                4 => artifact.test_uid = Some(string_value(id, value)?),
                                5 => artifact.test_display_name = Some(string_value(id, value)?),
                                6 => artifact.session_uid = Some(string_value(id, value)?),
                                _ => {}
                            }
                            Ok(())
                        })?;
                        artifact.full_path = required(full_path, "FileArtifact", "FullPath")?;
                        Ok(artifact)
                    })?
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(message)
    }
}

impl WireMessage for SessionEvent {
    const SERIALIZER_ID: i32 = serializer_id::SESSION_EVENT;

    fn encode(&self, out: &mut BytesMut) {
        let mut writer = ObjectWriter::new();
        writer
            .byte(1, self.session_type.wire_value())
            .opt_string(2, self.session_uid.as_deref())
            .opt_string(3, self.execution_id.as_deref());
        writer.finish(out);
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut session_type = None;
        let mut session_uid = None;
        let mut execution_id = None;
        Reader::new(payload).fields(|id, value| {
            match id {
                1 => session_type = Some(SessionType::try_from(byte_value(id, value)?)?),
                2 => session_uid = Some(string_value(id, value)?),
                3 => execution_id = Some(string_value(id, value)?),
                _ => {}
            }
            Ok(())
        })?;
        Ok(SessionEvent {
            session_type: required(session_type, "SessionEvent", "SessionType")?,
            session_uid,
            execution_id,
        })
    }
}

impl WireMessage for HostErrorMessage {
    const SERIALIZER_ID: i32 = serializer_id::ERROR;

    fn encode(&self, out: &mut BytesMut) {
        let mut writer = ObjectWriter::new();
        writer.string(1, &self.message);
        writer.finish(out);
    }

    fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut message = String::new();
        Reader::new(payload).fields(|id, value| {
            if id == 1 {
                message = string_value(id, value)?;
            }
            Ok(())
        })?;
        Ok(HostErrorMessage { message })
    }
}

/// Every message kind that can travel over a channel
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Void,
    Handshake(Handshake),
    CommandLineOptions(CommandLineOptionMessages),
    Module(Module),
    DiscoveredTests(DiscoveredTestMessages),
    TestResults(TestResultMessages),
    FileArtifacts(FileArtifactMessages),
    SessionEvent(SessionEvent),
    Error(HostErrorMessage),
    /// Serializer id this build does not know; payload already skipped
    Unknown { serializer_id: i32 },
}

impl Message {
    pub fn serializer_id(&self) -> i32 {
        match self {
            Message::Void => serializer_id::VOID,
            Message::Handshake(_) => Handshake::SERIALIZER_ID,
            Message::CommandLineOptions(_) => CommandLineOptionMessages::SERIALIZER_ID,
            Message::Module(_) => Module::SERIALIZER_ID,
            Message::DiscoveredTests(_) => DiscoveredTestMessages::SERIALIZER_ID,
            Message::TestResults(_) => TestResultMessages::SERIALIZER_ID,
            Message::FileArtifacts(_) => FileArtifactMessages::SERIALIZER_ID,
            Message::SessionEvent(_) => SessionEvent::SERIALIZER_ID,
            Message::Error(_) => HostErrorMessage::SERIALIZER_ID,
            Message::Unknown { serializer_id } => *serializer_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::Void => "Void",
            Message::Handshake(_) => "Handshake",
            Message::CommandLineOptions(_) => "CommandLineOptions",
            Message::Module(_) => "Module",
            Message::DiscoveredTests(_) => "DiscoveredTests",
            Message::TestResults(_) => "TestResults",
            Message::FileArtifacts(_) => "FileArtifacts",
            Message::SessionEvent(_) => "SessionEvent",
            Message::Error(_) => "Error",
            Message::Unknown { .. } => "Unknown",
        }
    }

    fn encode_payload(&self, out: &mut BytesMut) {
        match self {
            Message::Void | Message::Unknown { .. } => {}
            Message::Handshake(m) => m.encode(out),
            Message::CommandLineOptions(m) => m.encode(out),
            Message::Module(m) => m.encode(out),
            Message::DiscoveredTests(m) => m.encode(out),
            Message::TestResults(m) => m.encode(out),
            Message::FileArtifacts(m) => m.encode(out),
            Message::SessionEvent(m) => m.encode(out),
            Message::Error(m) => m.encode(out),
        }
    }

    /// Encode a complete frame including the length prefix
    pub fn encode_frame(&self) -> BytesMut {
        let mut payload = BytesMut::new();
        self.encode_payload(&mut payload);

        let mut frame = BytesMut::with_capacity(8 + payload.len());
        frame.put_u32_le((SERIALIZER_ID_SIZE + payload.len()) as u32);
        frame.put_i32_le(self.serializer_id());
        frame.extend_from_slice(&payload);
        frame
    }

    /// Decode the body of a frame (everything after the length prefix)
    pub fn decode(serializer_id: i32, payload: &[u8]) -> Result<Self, ProtocolError> {
        Ok(match serializer_id {
            serializer_id::VOID => Message::Void,
            serializer_id::HANDSHAKE => Message::Handshake(Handshake::decode(payload)?),
            serializer_id::COMMAND_LINE_OPTIONS => {
                Message::CommandLineOptions(CommandLineOptionMessages::decode(payload)?)
            }
            serializer_id::MODULE => Message::Module(Module::decode(payload)?),
            serializer_id::DISCOVERED_TESTS => {
                Message::DiscoveredTests(DiscoveredTestMessages::decode(payload)?)
            }
            serializer_id::TEST_RESULTS => {
                Message::TestResults(TestResultMessages::decode(payload)?)
            }
            serializer_id::FILE_ARTIFACTS => {
                Message::FileArtifacts(FileArtifactMessages::decode(payload)?)
            }
            serializer_id::SESSION_EVENT => Message::SessionEvent(SessionEvent::decode(payload)?),
            serializer_id::ERROR => Message::Error(HostErrorMessage::decode(payload)?),
            serializer_id => Message::Unknown { serializer_id },
        })
    }

    /// Decode a frame body that starts with the serializer id
    pub fn decode_body(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::new(body);
        let serializer_id = reader.i32()?;
        Message::decode(serializer_id, reader.take(reader.remaining())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HandshakeProperty;

    fn body(message: &Message) -> Vec<u8> {
        message.encode_frame()[4..].to_vec()
    }

    #[test]
    fn test_frame_length_prefix() {
        let frame = Message::Void.encode_frame();
        assert_eq!(&frame[..], &[4, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_handshake_layout() {
        let handshake = Handshake::new().with(HandshakeProperty::Pid, "7");
        let frame = Message::Handshake(handshake.clone()).encode_frame();
        // len, id 9, count 1, key 0, len 1, "7"
        assert_eq!(
            &frame[..],
            &[12, 0, 0, 0, 9, 0, 0, 0, 1, 0, 0, 1, 0, 0, 0, b'7']
        );
        let decoded = Message::decode_body(&frame[4..]).unwrap();
        assert_eq!(decoded, Message::Handshake(handshake));
    }

    #[test]
    fn test_unknown_field_is_skipped() {
        let mut writer = ObjectWriter::new();
        writer
            .byte(1, 0)
            .string(42, "from a newer host")
            .string(2, "session-1");
        let mut payload = BytesMut::new();
        writer.finish(&mut payload);

        let event = SessionEvent::decode(&payload).unwrap();
        assert_eq!(event.session_type, SessionType::Start);
        assert_eq!(event.session_uid.as_deref(), Some("session-1"));
    }

    #[test]
    fn test_invalid_state_rejected() {
        let mut writer = ObjectWriter::new();
        writer.list(2, &[()], |_, w| {
            w.string(1, "t1").string(2, "Test1").byte(3, 99);
        });
        let mut payload = BytesMut::new();
        writer.finish(&mut payload);

        let err = TestResultMessages::decode(&payload).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::InvalidEnum(InvalidEnumValue { value: 99, .. })
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let message = Message::Error(HostErrorMessage {
            message: "host failed".to_string(),
        });
        let mut bytes = body(&message);
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            Message::decode_body(&bytes),
            Err(ProtocolError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unknown_serializer_id() {
        let decoded = Message::decode(77, &[1, 2, 3]).unwrap();
        assert_eq!(decoded, Message::Unknown { serializer_id: 77 });
    }

    #[test]
    fn test_results_split_and_merge() {
        let message = TestResultMessages {
            execution_id: Some("exec-1".to_string()),
            results: vec![
                TestResult::Failed {
                    details: TestResultDetails::new("b", "B", TestState::Failed),
                    error_message: Some("Assert.Equal failed".to_string()),
                    error_stack_trace: Some("at B()".to_string()),
                },
                TestResult::Successful(
                    TestResultDetails::new("a", "A", TestState::Passed).with_duration_ticks(42),
                ),
            ],
        };
        let decoded = match Message::decode_body(&body(&Message::TestResults(message))).unwrap() {
            Message::TestResults(m) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(decoded.execution_id.as_deref(), Some("exec-1"));
        // Successful list is written first
        assert_eq!(decoded.results[0].details().uid, "a");
        assert_eq!(decoded.results[0].details().duration_ticks, 42);
        assert_eq!(decoded.results[1].error_message(), Some("Assert.Equal failed"));
    }

    #[test]
    fn test_module_requires_binary_path() {
        let mut writer = ObjectWriter::new();
        writer.string(3, "net8.0");
        let mut payload = BytesMut::new();
        writer.finish(&mut payload);
        assert!(matches!(
            Module::decode(&payload),
            Err(ProtocolError::MissingField { field: "BinaryPath", .. })
        ));
    }

    #[test]
    fn test_module_flags() {
        let module = Module::new("/out/Lib.dll")
            .with_target_framework("net8.0")
            .with_test_project(false);
        let decoded = match Message::decode_body(&body(&Message::Module(module.clone()))).unwrap()
        {
            Message::Module(m) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(decoded, module);
    }

    #[test]
    fn test_module_launch_profile_round_trip() {
        let module = Module::new("/out/Tests")
            .with_working_directory("/src/Tests")
            .with_env("DOTNET_ENVIRONMENT", "Test")
            .with_env("EMPTY", "")
            .with_launch_arguments(vec!["--seed".to_string(), "7".to_string()]);
        let decoded = match Message::decode_body(&body(&Message::Module(module.clone()))).unwrap()
        {
            Message::Module(m) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(decoded, module);
    }

    #[test]
    fn test_command_line_options_round_trip() {
        let message = CommandLineOptionMessages {
            module_path: Some("/out/Tests.dll".to_string()),
            options: vec![
                CommandLineOption {
                    name: "timeout".to_string(),
                    description: "Global timeout".to_string(),
                    is_hidden: false,
                    is_built_in: true,
                },
                CommandLineOption {
                    name: "internal-dump".to_string(),
                    description: String::new(),
                    is_hidden: true,
                    is_built_in: false,
                },
            ],
        };
        let decoded = Message::decode_body(&body(&Message::CommandLineOptions(message.clone())));
        assert_eq!(decoded.unwrap(), Message::CommandLineOptions(message));
    }

    #[test]
    fn test_command_line_option_requires_name() {
        let mut writer = ObjectWriter::new();
        writer.list(2, &[()], |_, w| {
            w.string(2, "no name").bool(3, false);
        });
        let mut payload = BytesMut::new();
        writer.finish(&mut payload);
        assert!(matches!(
            CommandLineOptionMessages::decode(&payload),
            Err(ProtocolError::MissingField { field: "Name", .. })
        ));
    }

    #[test]
    fn test_discovered_tests_round_trip() {
        let message = DiscoveredTestMessages {
            execution_id: Some("exec-2".to_string()),
            tests: vec![
                DiscoveredTest {
                    uid: "t1".to_string(),
                    display_name: "Namespace.Test1".to_string(),
                },
                DiscoveredTest {
                    uid: "t2".to_string(),
                    display_name: "Namespace.Test2".to_string(),
                },
            ],
        };
        let decoded = Message::decode_body(&body(&Message::DiscoveredTests(message.clone())));
        assert_eq!(decoded.unwrap(), Message::DiscoveredTests(message));
    }

    #[test]
    fn test_discovered_test_name_defaults_to_uid() {
        let mut writer = ObjectWriter::new();
        writer.list(2, &[()], |_, w| {
            w.string(1, "t1");
        });
        let mut payload = BytesMut::new();
        writer.finish(&mut payload);
        let decoded = DiscoveredTestMessages::decode(&payload).unwrap();
        assert!(decoded.execution_id.is_none());
        assert_eq!(decoded.tests[0].display_name, "t1");
    }

    #[test]
    fn test_file_artifacts_round_trip() {
        let mut artifact = FileArtifact::new("/results/coverage.xml");
        artifact.display_name = Some("coverage".to_string());
        artifact.test_uid = Some("t1".to_string());
        artifact.session_uid = Some("session-1".to_string());
        let message = FileArtifactMessages {
            execution_id: Some("exec-3".to_string()),
            artifacts: vec![artifact, FileArtifact::new("/results/log.txt")],
        };
        let decoded = Message::decode_body(&body(&Message::FileArtifacts(message.clone())));
        assert_eq!(decoded.unwrap(), Message::FileArtifacts(message));
    }

    #[test]
    fn test_file_artifact_requires_path() {
        let mut writer = ObjectWriter::new();
        writer.list(2, &[()], |_, w| {
            w.string(2, "orphan");
        });
        let mut payload = BytesMut::new();
        writer.finish(&mut payload);
        assert!(matches!(
            FileArtifactMessages::decode(&payload),
            Err(ProtocolError::MissingField { field: "FullPath", .. })
        ));
    }
}
