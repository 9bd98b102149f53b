/// Ask the process with id `pid` to stop what it is doing, as if the user pressed `Ctrl+C`.
///
/// Interactive shells typically abandon the running command instead of exiting. Closing stdin
/// afterward, or killing the process, ends it for good.
///
/// - on `cfg(unix)`: Sends a `SIGINT` to the process.
/// - on `cfg(windows)`: Sends a `CTRL_C_EVENT` to the process group.
/// - returns an `Unsupported` error on any other platform.
pub(crate) fn send_interrupt(pid: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = i32::try_from(pid).map_err(std::io::Error::other)?;
        signal::kill(Pid::from_raw(pid), Signal::SIGINT).map_err(std::io::Error::from)
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::Foundation::CTRL_C_EVENT;
        use windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent;

        let success = unsafe { GenerateConsoleCtrlEvent(CTRL_C_EVENT, pid) };
        if success == 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(all(not(windows), not(unix)))]
    {
        let _pid = pid;
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "cannot send interrupt signal, platform is unsupported",
        ))
    }
}
