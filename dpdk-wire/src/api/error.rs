pub type Errno = nix::errno::Errno;

/// Result type alias using nix's Errno for substrate operations
pub type Result<T> = std::result::Result<T, Errno>;

/// Convert a DPDK-style signed return code (`-errno` on failure) into a Result.
pub fn check_rte_success(ret: i32) -> Result<()> {
    if ret < 0 {
        Err(Errno::from_raw(-ret))
    } else {
        Ok(())
    }
}

/// The signed code reported for an errno, e.g. `-19` for `ENODEV`.
pub fn neg_code(errno: Errno) -> i32 {
    -(errno as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_rte_success() {
        assert_eq!(check_rte_success(0), Ok(()));
        assert_eq!(check_rte_success(3), Ok(()));
        assert_eq!(check_rte_success(-19), Err(Errno::ENODEV));
    }

    #[test]
    fn test_neg_code_round_trips() {
        let code = neg_code(Errno::EINVAL);
        assert!(code < 0);
        assert_eq!(check_rte_success(code), Err(Errno::EINVAL));
    }
}
