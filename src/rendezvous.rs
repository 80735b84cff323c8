//! Rendezvous and cleanup guard. A `Rendezvous` owns the private temporary
//! directory, the listening socket, and — once accepted — the peer socket.
//! Its `Drop` impl is the cleanup guard: it runs on every exit path (normal
//! return, `?`-propagated error, or unwind) without needing any global
//! state or an `atexit` registration.

use std::{
    env, error, fmt, fs,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    path::PathBuf,
};

use nix::{
    errno::Errno,
    fcntl::{fcntl, FcntlArg, OFlag},
    sys::socket::{bind, listen, socket, AddressFamily, Backlog, SockFlag, SockType, UnixAddr},
};

const SOCKET_NAME: &str = "socket.sock";
const DIR_PREFIX: &str = "polkit_demo.";
const DIR_SUFFIX_LEN: usize = 6;
const MAX_MKDIR_ATTEMPTS: u32 = 16;

#[derive(Debug)]
pub enum Error {
    CantCreateDir(std::io::Error),
    PathTooLong,
    SocketErr(Errno),
    BindErr(Errno),
    ListenErr(Errno),
    NonblockErr(Errno),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CantCreateDir(e) => write!(f, "could not create rendezvous directory: {e}"),
            Self::PathTooLong => write!(
                f,
                "rendezvous socket path would exceed the platform's socket address capacity"
            ),
            Self::SocketErr(e) => write!(f, "socket(): {e}"),
            Self::BindErr(e) => write!(f, "bind(): {e}"),
            Self::ListenErr(e) => write!(f, "listen(): {e}"),
            Self::NonblockErr(e) => write!(f, "failed to set listener non-blocking: {e}"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::CantCreateDir(e) => Some(e),
            Self::SocketErr(e) | Self::BindErr(e) | Self::ListenErr(e) | Self::NonblockErr(e) => {
                Some(e)
            }
            Self::PathTooLong => None,
        }
    }
}

/// The `sockaddr_un.sun_path` capacity on this platform, including the
/// terminating NUL the kernel expects.
fn max_path_len() -> usize {
    let addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    std::mem::size_of_val(&addr.sun_path)
}

fn random_suffix() -> String {
    let mut rng = fastrand::Rng::new();
    (0..DIR_SUFFIX_LEN)
        .map(|_| {
            const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
            ALPHABET[rng.usize(..ALPHABET.len())] as char
        })
        .collect()
}

/// mkstemp-style directory creation: retry on name collision, the same way
/// glibc's `mkdtemp` does internally, but without mutating a shared template
/// buffer.
fn make_dir(root: &std::path::Path) -> Result<PathBuf, Error> {
    for _ in 0..MAX_MKDIR_ATTEMPTS {
        let candidate = root.join(format!("{DIR_PREFIX}{}", random_suffix()));
        match fs::DirBuilder::new()
            .mode(0o700)
            .create(&candidate)
        {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(Error::CantCreateDir(e)),
        }
    }
    Err(Error::CantCreateDir(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        "exhausted attempts to allocate a unique rendezvous directory name",
    )))
}

trait DirBuilderModeExt {
    fn mode(&mut self, mode: u32) -> &mut Self;
}
impl DirBuilderModeExt for fs::DirBuilder {
    fn mode(&mut self, mode: u32) -> &mut Self {
        use std::os::unix::fs::DirBuilderExt;
        DirBuilderExt::mode(self, mode)
    }
}

/// The private IPC rendezvous: a directory owned only by the invoking user,
/// plus a listening stream socket inside it. Owns cleanup for both.
pub struct Rendezvous {
    dir: PathBuf,
    sock_path: PathBuf,
    listener: Option<OwnedFd>,
    peer: Option<OwnedFd>,
}

impl Rendezvous {
    /// Create the directory and the bound, listening, non-blocking socket.
    /// Fails closed: if any step after the directory is created fails, the
    /// directory is removed before returning the error.
    pub fn create() -> Result<Self, Error> {
        let root = env::var_os("TMPDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"));

        let dir = make_dir(&root)?;
        match Self::bind_in(&dir) {
            Ok((sock_path, listener)) => Ok(Self {
                dir,
                sock_path,
                listener: Some(listener),
                peer: None,
            }),
            Err(e) => {
                let _ = fs::remove_dir_all(&dir);
                Err(e)
            }
        }
    }

    fn bind_in(dir: &std::path::Path) -> Result<(PathBuf, OwnedFd), Error> {
        let sock_path = dir.join(SOCKET_NAME);
        let path_str = sock_path.to_string_lossy();
        // +1 for the NUL terminator the kernel appends to sun_path.
        if path_str.len() + 1 > max_path_len() {
            return Err(Error::PathTooLong);
        }

        let fd = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::SOCK_CLOEXEC,
            None,
        )
        .map_err(Error::SocketErr)?;

        let addr = UnixAddr::new(&sock_path).map_err(|_| Error::PathTooLong)?;
        bind(fd.as_raw_fd(), &addr).map_err(Error::BindErr)?;
        listen(&fd, Backlog::new(1).map_err(Error::ListenErr)?).map_err(Error::ListenErr)?;

        let flags = fcntl(&fd, FcntlArg::F_GETFL).map_err(Error::NonblockErr)?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(&fd, FcntlArg::F_SETFL(flags)).map_err(Error::NonblockErr)?;

        Ok((sock_path, fd))
    }

    pub fn sock_path(&self) -> &std::path::Path {
        &self.sock_path
    }

    pub fn listener_fd(&self) -> RawFd {
        self.listener
            .as_ref()
            .expect("listener accessed after it was closed")
            .as_raw_fd()
    }

    /// Close the listening socket now rather than waiting for `Drop`. Used
    /// once the single expected peer has been accepted — the listener has
    /// no further purpose once that happens.
    pub fn close_listener(&mut self) {
        self.listener = None;
    }

    pub fn set_peer(&mut self, peer: OwnedFd) {
        self.peer = Some(peer);
    }

    pub fn peer_fd(&self) -> Option<RawFd> {
        self.peer.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn take_peer(&mut self) -> Option<OwnedFd> {
        self.peer.take()
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        // Dropping `listener`/`peer` (both `Option<OwnedFd>`) closes each
        // descriptor at most once; there is no separate close() to race
        // against a second close() here.
        self.listener = None;
        self.peer = None;
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove rendezvous directory {:?}: {e}", self.dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_drop_removes_directory() {
        let rendezvous = Rendezvous::create().unwrap();
        let dir = rendezvous.dir.clone();
        assert!(dir.exists());
        assert!(rendezvous.sock_path().exists());
        drop(rendezvous);
        assert!(!dir.exists());
    }

    #[test]
    fn directory_is_user_only() {
        use std::os::unix::fs::PermissionsExt;
        let rendezvous = Rendezvous::create().unwrap();
        let mode = fs::metadata(&rendezvous.dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn path_too_long_is_rejected() {
        let root = PathBuf::from("/tmp").join("a".repeat(max_path_len()));
        let err = Rendezvous::bind_in(&root).unwrap_err();
        assert!(matches!(err, Error::PathTooLong));
    }
}
