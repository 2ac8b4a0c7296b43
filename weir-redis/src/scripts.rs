//! Server-side atomic scripts.
//!
//! Each script runs as one unit inside the engine, which is what gives
//! every cache mutation its CAS semantics without any proxy-held lock.
//! The leading status tokens (`err_ok`, `err_not_in_redis`,
//! `err_not_exist`, `err_version_not_match`) are the wire contract with
//! existing deployments.
//!
//! The cache timeout rides in as a trailing ARGV on every invocation
//! rather than being substituted into the script text, so a single body
//! (and a single digest) serves every timeout override.

/// Atomic read.
///
/// KEYS[1] = entry key, ARGV[1] = ttl seconds.
///
/// Absent record signals `err_not_in_redis`; a version-0 record is the
/// negative-cache answer `err_not_exist`. A live entry refreshes its TTL
/// only if one is active: a dirty entry persists untouched.
pub const GET_SCRIPT: &str = r#"
local ttl_secs = tonumber(ARGV[1])
local v = redis.call('hmget', KEYS[1], 'version', 'value')
local version = v[1]
local value = v[2]
if not version then
    return {'err_not_in_redis'}
elseif tonumber(version) == 0 then
    return {'err_not_exist'}
else
    local ttl = redis.call('ttl', KEYS[1])
    if tonumber(ttl) > 0 then
        redis.call('expire', KEYS[1], ttl_secs)
    end
    return {'err_ok', value, tonumber(version)}
end
"#;

/// Atomic CAS write.
///
/// KEYS[1] = entry key, KEYS[2] = dirty-set key,
/// ARGV[1] = new value, ARGV[2] = expected version (0 = unconditional).
///
/// On success the version increments by one, the TTL is cleared so the
/// unflushed entry cannot expire, and the key is marked dirty with the
/// new version - all in the same unit.
pub const SET_SCRIPT: &str = r#"
local expected = tonumber(ARGV[2])
local version = redis.call('hget', KEYS[1], 'version')
if not version then
    return {'err_not_in_redis'}
end
version = tonumber(version)
if expected > 0 and version ~= expected then
    return {'err_version_not_match'}
end
version = version + 1
redis.call('hset', KEYS[1], 'version', version, 'value', ARGV[1])
redis.call('persist', KEYS[1])
redis.call('hset', KEYS[2], KEYS[1], version)
return {'err_ok', version}
"#;

/// Atomic initialize-or-read, race-safe against concurrent populators.
///
/// KEYS[1] = entry key, ARGV[1] = loaded version, ARGV[2] = loaded
/// value, ARGV[3] = ttl seconds.
///
/// An existing record wins regardless of what was loaded. An absent one
/// is initialized from the loaded row, or as the negative-cache sentinel
/// (version 0, no value) when the load found nothing.
pub const LOAD_GET_SCRIPT: &str = r#"
local ttl_secs = tonumber(ARGV[3])
local v = redis.call('hmget', KEYS[1], 'version', 'value')
local version = v[1]
local value = v[2]
if version then
    local ttl = redis.call('ttl', KEYS[1])
    if tonumber(ttl) > 0 then
        redis.call('expire', KEYS[1], ttl_secs)
    end
    if tonumber(version) > 0 then
        return {'err_ok', value, tonumber(version)}
    else
        return {'err_not_exist'}
    end
else
    if tonumber(ARGV[1]) > 0 then
        redis.call('hset', KEYS[1], 'version', ARGV[1], 'value', ARGV[2])
        redis.call('expire', KEYS[1], ttl_secs)
        return {'err_ok', ARGV[2], tonumber(ARGV[1])}
    else
        redis.call('hset', KEYS[1], 'version', 0)
        redis.call('expire', KEYS[1], ttl_secs)
        return {'err_not_exist'}
    end
end
"#;

/// Fire-and-forget cache warm.
///
/// KEYS[1] = entry key, ARGV[1] = version, ARGV[2] = value,
/// ARGV[3] = ttl seconds.
///
/// Overwrites only if the record is absent or strictly older; fresher
/// cached data is kept.
pub const LOAD_SET_SCRIPT: &str = r#"
local ttl_secs = tonumber(ARGV[3])
local version = redis.call('hget', KEYS[1], 'version')
if not version or tonumber(version) < tonumber(ARGV[1]) then
    redis.call('hset', KEYS[1], 'version', ARGV[1], 'value', ARGV[2])
    redis.call('expire', KEYS[1], ttl_secs)
end
"#;

/// Versioned dirty-marker clear.
///
/// KEYS[1] = dirty-set key, KEYS[2] = entry key,
/// ARGV[1] = flushed version, ARGV[2] = ttl seconds.
///
/// Removes the marker and starts the entry's TTL only while the marker
/// still holds the flushed version; a superseding write leaves it
/// intact for the next sync pass.
pub const CLEAR_DIRTY_SCRIPT: &str = r#"
local ttl_secs = tonumber(ARGV[2])
local marked = redis.call('hget', KEYS[1], KEYS[2])
if marked and tonumber(marked) == tonumber(ARGV[1]) then
    redis.call('hdel', KEYS[1], KEYS[2])
    redis.call('expire', KEYS[2], ttl_secs)
end
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::reply::{
        STATUS_NOT_EXIST, STATUS_NOT_IN_CACHE, STATUS_OK, STATUS_VERSION_MISMATCH,
    };

    #[test]
    fn test_get_script_covers_all_statuses() {
        assert!(GET_SCRIPT.contains(STATUS_OK));
        assert!(GET_SCRIPT.contains(STATUS_NOT_IN_CACHE));
        assert!(GET_SCRIPT.contains(STATUS_NOT_EXIST));
    }

    #[test]
    fn test_set_script_covers_cas_statuses() {
        assert!(SET_SCRIPT.contains(STATUS_OK));
        assert!(SET_SCRIPT.contains(STATUS_NOT_IN_CACHE));
        assert!(SET_SCRIPT.contains(STATUS_VERSION_MISMATCH));
        // Unflushed entries must not expire.
        assert!(SET_SCRIPT.contains("persist"));
    }

    #[test]
    fn test_load_get_script_never_misses() {
        assert!(!LOAD_GET_SCRIPT.contains(STATUS_NOT_IN_CACHE));
        assert!(LOAD_GET_SCRIPT.contains(STATUS_OK));
        assert!(LOAD_GET_SCRIPT.contains(STATUS_NOT_EXIST));
    }

    #[test]
    fn test_ttl_always_rides_as_trailing_argv() {
        // Digest stability depends on no config substitution in bodies.
        for script in [
            GET_SCRIPT,
            LOAD_GET_SCRIPT,
            LOAD_SET_SCRIPT,
            CLEAR_DIRTY_SCRIPT,
        ] {
            assert!(script.contains("ttl_secs"), "ttl must come from ARGV");
            assert!(!script.contains("%d"), "no format substitution");
        }
    }
}
