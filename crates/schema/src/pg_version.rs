use sqlx::{query_scalar, PgExecutor};

use crate::SetupError;

/// Oldest supported `server_version_num`. `skip locked` on CTEs, `make_interval` and
/// crash-safe hash indexes are all available from v12.
pub const MIN_SERVER_VERSION_NUM: u32 = 120000;

/// Reads `server_version_num` and rejects servers older than v12
pub async fn fetch_server_version<'e, E>(executor: E) -> Result<u32, SetupError>
where
    E: PgExecutor<'e>,
{
    let version: String = query_scalar("show server_version_num")
        .fetch_one(executor)
        .await?;

    check_server_version(&version)
}

pub fn check_server_version(version: &str) -> Result<u32, SetupError> {
    let version = version.trim().parse::<u32>()?;
    if version < MIN_SERVER_VERSION_NUM {
        return Err(SetupError::IncompatibleVersion(version));
    }

    Ok(version)
}

/// Major version of a `server_version_num`, `170002` is 17
pub fn major_version(version: u32) -> u32 {
    version / 10000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_versions() {
        assert_eq!(check_server_version("120000").unwrap(), 120000);
        assert_eq!(check_server_version("160004\n").unwrap(), 160004);
        assert_eq!(major_version(170002), 17);
    }

    #[test]
    fn old_or_garbled_versions_are_rejected() {
        assert!(matches!(
            check_server_version("110021"),
            Err(SetupError::IncompatibleVersion(110021))
        ));
        assert!(matches!(
            check_server_version("sixteen"),
            Err(SetupError::ParseVersionError(_))
        ));
    }
}
