//! Session records and the options that drive them
//! - `TransferDirection`: which party pushes file bytes
//! - `Metadata`: free-form JSON object carried in the handshake
//! - Send/accept options resolved before a transfer starts
//! - `SendingSession` / `ReceivingSession`: one per connection

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::bytes::base_file_name;
use crate::error::{Result, TransferError};
use crate::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_QUEUE_CAPACITY, MAX_SEGMENT_LEN};

/// Arbitrary JSON object attached to a handshake.
pub type Metadata = Map<String, Value>;

/// Which party pushes file bytes in a session, seen from the local side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Invalid,
    Send,
    Receive,
}

/// Options for pushing a local file to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSendOptions {
    pub file_path: PathBuf,
    /// Largest segment written to the wire, in bytes.
    pub max_buffer_size: usize,
    /// Segments buffered between the disk reader and the network writer.
    pub queue_capacity: usize,
}

impl FileSendOptions {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        FileSendOptions {
            file_path: file_path.into(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Segments larger than a receiver accepts are refused here, before any byte is sent.
    pub fn validate(&self) -> Result<()> {
        if self.max_buffer_size == 0 {
            return Err(TransferError::InvalidState("max_buffer_size must be positive".into()));
        }
        if self.max_buffer_size > MAX_SEGMENT_LEN as usize {
            return Err(TransferError::InvalidState(format!(
                "max_buffer_size {} exceeds the segment limit {}",
                self.max_buffer_size, MAX_SEGMENT_LEN
            )));
        }
        if self.queue_capacity == 0 {
            return Err(TransferError::InvalidState("queue_capacity must be positive".into()));
        }
        Ok(())
    }
}

/// Options for storing a file pushed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAcceptOptions {
    /// Name requested from the peer, or the local name to store under.
    pub file_name: String,
    pub output_directory: PathBuf,
}

impl FileAcceptOptions {
    pub fn new(file_name: impl Into<String>, output_directory: impl Into<PathBuf>) -> Self {
        FileAcceptOptions {
            file_name: file_name.into(),
            output_directory: output_directory.into(),
        }
    }

    /// Destination path; only the base name of `file_name` is used.
    pub fn destination(&self) -> Result<PathBuf> {
        let name = base_file_name(Path::new(&self.file_name))?;
        Ok(self.output_directory.join(name))
    }
}

/// Options returned by a policy callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOptions {
    Send(FileSendOptions),
    Accept(FileAcceptOptions),
}

/// State shared by both session kinds.
#[derive(Debug)]
pub struct Session<S> {
    stream: S,
    direction: TransferDirection,
    file_name: Option<String>,
    metadata: Option<Metadata>,
}

impl<S> Session<S> {
    pub fn new(stream: S, direction: TransferDirection) -> Self {
        Session {
            stream,
            direction,
            file_name: None,
            metadata: None,
        }
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Releases the stream, ending the session.
    pub fn into_stream(self) -> S {
        self.stream
    }

    pub(crate) fn set_file_name(&mut self, file_name: String) {
        self.file_name = Some(file_name);
    }

    pub(crate) fn set_metadata(&mut self, metadata: Option<Metadata>) {
        self.metadata = metadata;
    }
}

/// Session of the party pushing file bytes.
#[derive(Debug)]
pub struct SendingSession<S> {
    pub session: Session<S>,
    pub options: Option<FileSendOptions>,
}

impl<S> SendingSession<S> {
    pub fn new(stream: S) -> Self {
        SendingSession {
            session: Session::new(stream, TransferDirection::Send),
            options: None,
        }
    }

    /// Initiator-side session: the file name on the wire comes from the options.
    pub fn outgoing(stream: S, options: FileSendOptions, metadata: Option<Metadata>) -> Result<Self> {
        let name = base_file_name(&options.file_path)?;
        let mut session = Session::new(stream, TransferDirection::Send);
        session.set_file_name(name);
        session.set_metadata(metadata);
        Ok(SendingSession {
            session,
            options: Some(options),
        })
    }

    pub fn into_stream(self) -> S {
        self.session.into_stream()
    }
}

/// Session of the party storing file bytes.
#[derive(Debug)]
pub struct ReceivingSession<S> {
    pub session: Session<S>,
    pub options: Option<FileAcceptOptions>,
}

impl<S> ReceivingSession<S> {
    pub fn new(stream: S) -> Self {
        ReceivingSession {
            session: Session::new(stream, TransferDirection::Receive),
            options: None,
        }
    }

    /// Initiator-side session asking the peer for `options.file_name`.
    pub fn outgoing(stream: S, options: FileAcceptOptions, metadata: Option<Metadata>) -> Result<Self> {
        let name = base_file_name(Path::new(&options.file_name))?;
        let mut session = Session::new(stream, TransferDirection::Receive);
        session.set_file_name(name);
        session.set_metadata(metadata);
        Ok(ReceivingSession {
            session,
            options: Some(options),
        })
    }

    pub fn into_stream(self) -> S {
        self.session.into_stream()
    }
}

/// Access to the shared part of either session kind.
pub trait TransferSession {
    type Stream;
    /// Options this session kind runs with.
    type Options;

    fn core(&self) -> &Session<Self::Stream>;
    fn core_mut(&mut self) -> &mut Session<Self::Stream>;
    fn has_options(&self) -> bool;
    fn set_options(&mut self, options: Self::Options);

    /// Policy options of the matching kind, `None` for the other kind.
    fn select_options(options: TransferOptions) -> Option<Self::Options>;
    /// Reject options the transfer could not run with.
    fn check_options(options: &Self::Options) -> Result<()>;
}

impl<S> TransferSession for SendingSession<S> {
    type Stream = S;
    type Options = FileSendOptions;

    fn core(&self) -> &Session<S> {
        &self.session
    }

    fn core_mut(&mut self) -> &mut Session<S> {
        &mut self.session
    }

    fn has_options(&self) -> bool {
        self.options.is_some()
    }

    fn set_options(&mut self, options: FileSendOptions) {
        self.options = Some(options);
    }

    fn select_options(options: TransferOptions) -> Option<FileSendOptions> {
        match options {
            TransferOptions::Send(options) => Some(options),
            TransferOptions::Accept(_) => None,
        }
    }

    fn check_options(options: &FileSendOptions) -> Result<()> {
        options.validate()
    }
}

impl<S> TransferSession for ReceivingSession<S> {
    type Stream = S;
    type Options = FileAcceptOptions;

    fn core(&self) -> &Session<S> {
        &self.session
    }

    fn core_mut(&mut self) -> &mut Session<S> {
        &mut self.session
    }

    fn has_options(&self) -> bool {
        self.options.is_some()
    }

    fn set_options(&mut self, options: FileAcceptOptions) {
        self.options = Some(options);
    }

    fn select_options(options: TransferOptions) -> Option<FileAcceptOptions> {
        match options {
            TransferOptions::Accept(options) => Some(options),
            TransferOptions::Send(_) => None,
        }
    }

    fn check_options(options: &FileAcceptOptions) -> Result<()> {
        options.destination().map(|_| ())
    }
}
