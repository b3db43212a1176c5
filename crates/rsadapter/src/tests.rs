//! Scenario tests across handles, statements and the managed connection.

use std::error::Error as _;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ConnectionSharing, LocalTransactionSwitching};
use crate::driver::{Holdability, IsolationLevel, MetadataQuery, Navigation, Value};
use crate::error::{DriverError, SharingViolation, XaErrorCode};
use crate::managed::{ConnectionRequestInfo, TransactionState};
use crate::state::WrapperState;
use crate::testing::{Fixture, MockConnection, OtherVendor};

// ═══════════════════════════════════════════════════════════════════════════
// Transactions
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_begin_transaction_is_idempotent() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();

    conn.begin_transaction_if_necessary().unwrap();
    conn.begin_transaction_if_necessary().unwrap();

    assert_eq!(fixture.listener.names(), vec!["LOCAL_TRANSACTION_STARTED"]);
    assert_eq!(
        fixture.managed.transaction_state(),
        TransactionState::LocalTransactionActive
    );
}

#[test]
fn test_lazy_local_transaction_begins_once_before_query() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();
    assert!(fixture.listener.names().is_empty());

    let rs = conn.create_statement().unwrap().execute_query("SELECT 1").unwrap();

    assert!(!rs.is_closed());
    assert_eq!(fixture.listener.names(), vec!["LOCAL_TRANSACTION_STARTED"]);
    assert_eq!(fixture.driver.calls_named("statement.execute_query"), 1);
}

#[test]
fn test_auto_commit_handle_never_starts_local_transaction() {
    let fixture = Fixture::new();
    let conn = fixture.connection();

    conn.create_statement().unwrap().execute_update("DELETE FROM T").unwrap();

    assert!(fixture.listener.names().is_empty());
    assert_eq!(fixture.managed.transaction_state(), TransactionState::NoTransaction);
}

#[test]
fn test_stale_connection_commit_skips_driver() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();
    conn.begin_transaction_if_necessary().unwrap();
    fixture.managed.mark_stale();

    assert!(conn.commit().unwrap_err().is_stale_connection());
    assert!(conn.rollback().unwrap_err().is_stale_connection());
    assert!(conn.create_statement().unwrap_err().is_stale_connection());
    assert_eq!(fixture.driver.calls_named("commit"), 0);
    assert_eq!(fixture.driver.calls_named("rollback"), 0);
}

#[test]
fn test_savepoint_rejected_in_global_transaction() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    fixture.managed.enlist_global().unwrap();

    let err = conn.set_savepoint(Some("before_update")).unwrap_err();

    assert!(err.is_not_valid_in_global_transaction());
    assert_eq!(fixture.driver.calls_named("set_savepoint"), 0);
}

#[test]
fn test_savepoint_starts_local_transaction() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();

    let savepoint = conn.set_savepoint(Some("sp1")).unwrap();
    conn.rollback_to_savepoint(&savepoint).unwrap();
    conn.release_savepoint(&savepoint).unwrap();

    assert_eq!(savepoint.name.as_deref(), Some("sp1"));
    assert_eq!(fixture.listener.names(), vec!["LOCAL_TRANSACTION_STARTED"]);
    assert_eq!(fixture.driver.calls_named("rollback_to_savepoint"), 1);
}

#[test]
fn test_commit_and_auto_commit_rejected_in_global_transaction() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    fixture.managed.enlist_global().unwrap();

    assert!(conn.commit().unwrap_err().is_not_valid_in_global_transaction());
    assert!(conn.rollback().unwrap_err().is_not_valid_in_global_transaction());
    assert!(
        conn.set_auto_commit(true)
            .unwrap_err()
            .is_not_valid_in_global_transaction()
    );

    // switching auto-commit off is recorded without touching the driver
    conn.set_auto_commit(false).unwrap();
    assert!(!conn.auto_commit().unwrap());
    assert_eq!(fixture.driver.calls_named("set_auto_commit"), 0);
    assert_eq!(fixture.driver.calls_named("commit"), 0);
}

#[test]
fn test_commit_without_transaction_forwards_to_driver() {
    let fixture = Fixture::new();
    let conn = fixture.connection();

    conn.commit().unwrap();

    assert_eq!(fixture.driver.calls_named("commit"), 1);
    assert!(fixture.listener.names().is_empty());
}

#[test]
fn test_non_transactional_data_source() {
    let fixture = Fixture::with_config(|b| b.transactional(false));
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();

    conn.create_statement().unwrap().execute("UPDATE T SET A = 1").unwrap();
    conn.commit().unwrap();

    assert!(fixture.listener.names().is_empty());
    assert_eq!(fixture.managed.transaction_state(), TransactionState::NoTransaction);
    assert_eq!(fixture.driver.calls_named("commit"), 1);
}

#[test]
fn test_lazy_enlistment_in_global_transaction() {
    let fixture = Fixture::new();
    fixture.transactions.set_active(true);
    fixture.manager.enable_lazy_enlistment(true);
    let conn = fixture.connection();

    conn.create_statement().unwrap();
    conn.create_statement().unwrap();

    assert!(fixture.managed.in_global_transaction());
    assert_eq!(fixture.manager.enlistment().enlisted(), 1);
    assert!(fixture.listener.names().is_empty());
}

#[test]
fn test_global_transaction_without_lazy_enlistment_falls_back_to_local() {
    let fixture = Fixture::new();
    fixture.transactions.set_active(true);
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();

    conn.create_statement().unwrap();

    assert_eq!(
        fixture.managed.transaction_state(),
        TransactionState::LocalTransactionActive
    );
    assert_eq!(fixture.listener.names(), vec!["LOCAL_TRANSACTION_STARTED"]);
}

#[test]
fn test_lazy_enlistment_rm_fail_is_connection_failure() {
    let fixture = Fixture::new();
    fixture.transactions.set_active(true);
    fixture.manager.enable_lazy_enlistment(true);
    fixture
        .manager
        .enlistment()
        .fail_with(Some(XaErrorCode::RmFail));
    let conn = fixture.connection();

    let err = conn.create_statement().unwrap_err();

    assert!(err.is_connection_failure());
    assert_eq!(fixture.listener.names(), vec!["CONNECTION_ERROR_OCCURRED"]);
    assert!(!fixture.managed.in_global_transaction());
}

#[test]
fn test_lazy_enlistment_other_xa_error_is_resource_error() {
    let fixture = Fixture::new();
    fixture.transactions.set_active(true);
    fixture.manager.enable_lazy_enlistment(true);
    fixture
        .manager
        .enlistment()
        .fail_with(Some(XaErrorCode::Proto));
    let conn = fixture.connection();

    let err = conn.create_statement().unwrap_err();

    assert!(err.is_resource());
    assert!(fixture.listener.names().is_empty());
}

#[test]
fn test_expired_transaction_deadline_fails_query() {
    let fixture = Fixture::with_config(|b| b.sync_query_timeout_with_transaction_timeout(true));
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    fixture.managed.enlist_global().unwrap();
    fixture.transactions.set_deadline(Some(Instant::now()));

    let err = stmt.execute_query("SELECT 1").unwrap_err();

    assert!(err.is_transaction_timeout());
    assert_eq!(fixture.driver.calls_named("statement.execute_query"), 0);
}

#[test]
fn test_query_timeout_follows_transaction_deadline() {
    let fixture = Fixture::with_config(|b| b.sync_query_timeout_with_transaction_timeout(true));
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    fixture.managed.enlist_global().unwrap();
    fixture
        .transactions
        .set_deadline(Some(Instant::now() + Duration::from_secs(90)));

    stmt.execute("UPDATE T SET A = 1").unwrap();
    assert_eq!(stmt.query_timeout().unwrap(), 90);

    fixture.managed.end_global().unwrap();
    fixture.transactions.set_deadline(None);
    stmt.execute("UPDATE T SET A = 2").unwrap();
    assert_eq!(stmt.query_timeout().unwrap(), 0);
}

#[test]
fn test_user_query_timeout_is_not_synced() {
    let fixture = Fixture::with_config(|b| b.sync_query_timeout_with_transaction_timeout(true));
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    stmt.set_query_timeout(7).unwrap();
    fixture.managed.enlist_global().unwrap();
    fixture
        .transactions
        .set_deadline(Some(Instant::now() + Duration::from_secs(90)));

    stmt.execute("UPDATE T SET A = 1").unwrap();

    assert_eq!(stmt.query_timeout().unwrap(), 7);
}

// ═══════════════════════════════════════════════════════════════════════════
// Local transaction switching policy
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_permissive_auto_commit_commits_local_transaction() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();
    conn.begin_transaction_if_necessary().unwrap();

    conn.set_auto_commit(true).unwrap();

    assert_eq!(
        fixture.listener.names(),
        vec!["LOCAL_TRANSACTION_STARTED", "LOCAL_TRANSACTION_COMMITTED"]
    );
    assert_eq!(fixture.driver.calls_named("commit"), 1);
    assert!(conn.auto_commit().unwrap());
    assert!(fixture.managed.auto_commit());
}

#[test]
fn test_strict_policy_rejects_switches_in_local_transaction() {
    let fixture =
        Fixture::with_config(|b| b.local_transaction_switching(LocalTransactionSwitching::Strict));
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();
    conn.begin_transaction_if_necessary().unwrap();

    assert!(conn.set_auto_commit(true).unwrap_err().is_invalid_transaction_state());
    assert!(
        conn.set_transaction_isolation(IsolationLevel::Serializable)
            .unwrap_err()
            .is_invalid_transaction_state()
    );
    // unchanged values are still accepted
    conn.set_transaction_isolation(IsolationLevel::ReadCommitted)
        .unwrap();

    conn.commit().unwrap();
    conn.set_auto_commit(true).unwrap();
    assert_eq!(fixture.driver.calls_named("commit"), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// Association
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_dissociate_closes_every_child() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    let rs = stmt.execute_query("SELECT 1").unwrap();
    let prepared = conn.prepare_statement("SELECT 2").unwrap();
    let metadata = conn.metadata().unwrap();
    let catalogs = metadata.query(&MetadataQuery::Catalogs).unwrap();
    assert_eq!(conn.introspect().children, 3);

    conn.dissociate().unwrap();

    assert_eq!(conn.state(), WrapperState::Inactive);
    assert_eq!(conn.open_statements(), 0);
    assert_eq!(conn.introspect().children, 0);
    assert!(stmt.is_closed());
    assert!(rs.is_closed());
    assert!(prepared.is_closed());
    assert!(metadata.is_closed());
    assert!(catalogs.is_closed());
    assert_eq!(fixture.managed.handle_count(), 0);
}

#[test]
fn test_reassociate_with_open_children_fails() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let _stmt = conn.create_statement().unwrap();
    let key = fixture.factory.access_key();

    let same = conn.reassociate(&fixture.managed, key).unwrap_err();
    let other = conn
        .reassociate(&fixture.managed_connection(), key)
        .unwrap_err();

    assert!(same.is_children_still_open());
    assert!(other.is_children_still_open());
}

#[test]
fn test_reassociate_moves_handle_to_new_managed_connection() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.dissociate().unwrap();
    let other = fixture.managed_connection();

    other.associate_connection(&conn).unwrap();

    let bound = conn
        .managed_connection(fixture.factory.access_key())
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&bound, &other));
    assert_eq!(other.handle_count(), 1);
    assert_eq!(conn.state(), WrapperState::Active);
}

#[test]
fn test_reserve_then_reassociate_keeps_children() {
    let fixture = Fixture::new();
    fixture.driver.set_rows(vec![vec![Value::Int(1)]]);
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    let rs = stmt.execute_query("SELECT 1").unwrap();
    let key = fixture.factory.access_key();

    conn.reserve(key).unwrap();
    assert!(conn.is_reserved());
    assert_eq!(conn.state(), WrapperState::Inactive);

    conn.reassociate(&fixture.managed, key).unwrap();

    assert_eq!(conn.state(), WrapperState::Active);
    assert!(!conn.is_reserved());
    assert!(!stmt.is_closed());
    assert!(rs.next().unwrap());
}

#[test]
fn test_reserved_handle_reactivates_on_child_use() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    conn.reserve(fixture.factory.access_key()).unwrap();

    stmt.execute("UPDATE T SET A = 1").unwrap();

    assert_eq!(conn.state(), WrapperState::Active);
    assert_eq!(fixture.manager.associations(), 1);
    assert!(!stmt.is_closed());
}

#[test]
fn test_reserved_handle_rejects_other_managed_connection() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let key = fixture.factory.access_key();
    conn.reserve(key).unwrap();

    let err = conn
        .reassociate(&fixture.managed_connection(), key)
        .unwrap_err();

    assert!(err.is_reservation_mismatch());
    assert!(conn.is_reserved());
}

#[test]
fn test_reserved_handle_reactivation_keeps_mismatch_kind() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    conn.reserve(fixture.factory.access_key()).unwrap();
    fixture.manager.set_target(fixture.managed_connection());

    let err = stmt.execute("UPDATE T SET A = 1").unwrap_err();

    assert!(err.is_reservation_mismatch());
    assert!(!err.is_resource());
    assert!(conn.is_reserved());
}

#[test]
fn test_client_info_restore_failure_reports_connection_error() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let info = [("ApplicationName".to_string(), "billing".to_string())]
        .into_iter()
        .collect();
    conn.set_client_info(&info).unwrap();
    conn.dissociate().unwrap();
    fixture.driver.fail_on(
        "set_client_info",
        DriverError::new("connection reset").with_sql_state("08006"),
    );

    let err = conn.activate().unwrap_err();

    assert!(err.is_connection_failure());
    assert_eq!(fixture.listener.names(), vec!["CONNECTION_ERROR_OCCURRED"]);
    assert_eq!(conn.state(), WrapperState::Inactive);
}

#[test]
fn test_dropped_handle_no_longer_shares() {
    let fixture = Fixture::new();
    let first = fixture.connection();
    let second = fixture.connection();
    assert_eq!(fixture.managed.handle_count(), 2);

    drop(second);

    assert_eq!(fixture.managed.handle_count(), 1);
    assert_eq!(fixture.listener.names(), vec!["CONNECTION_CLOSED"]);
    first.set_read_only(true).unwrap();
    assert!(fixture.managed.is_read_only());
}

#[test]
fn test_dropped_handle_returns_statements_to_cache() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let prepared = conn.prepare_statement("SELECT ID FROM ORDERS").unwrap();

    drop(prepared);
    drop(conn);

    let stats = fixture.managed.statement_cache_stats().unwrap();
    assert_eq!(stats.len, 1);
    assert_eq!(fixture.managed.handle_count(), 0);
}

#[test]
fn test_cleanup_dissociates_handles() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();

    fixture.managed.cleanup().unwrap();

    assert_eq!(conn.state(), WrapperState::Inactive);
    assert!(stmt.is_closed());
    conn.create_statement().unwrap();
    assert_eq!(fixture.manager.associations(), 1);
    assert_eq!(fixture.managed.handle_count(), 1);
}

#[test]
fn test_client_info_restored_after_reassociation() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let info = [("ApplicationName".to_string(), "billing".to_string())]
        .into_iter()
        .collect();
    conn.set_client_info(&info).unwrap();

    conn.dissociate().unwrap();
    conn.activate().unwrap();

    assert_eq!(fixture.driver.calls_named("set_client_info"), 2);
    assert_eq!(conn.client_info().unwrap(), info);
}

#[test]
fn test_close_notifies_managed_connection() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    assert_eq!(fixture.managed.handle_count(), 1);

    conn.close().unwrap();

    assert_eq!(fixture.managed.handle_count(), 0);
    assert_eq!(fixture.listener.names(), vec!["CONNECTION_CLOSED"]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Sharing
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_shared_read_only_change_is_rejected() {
    let fixture = Fixture::new();
    let first = fixture.connection();
    let _second = fixture.connection();
    assert_eq!(fixture.managed.handle_count(), 2);

    let err = first.set_read_only(true).unwrap_err();

    assert!(err.is_sharing_violation());
    let cause = err
        .source()
        .and_then(|s| s.downcast_ref::<SharingViolation>())
        .unwrap();
    assert_eq!(cause.property(), "read-only");
    assert_eq!(cause.handles(), 2);

    first.set_read_only(false).unwrap();
    assert!(!fixture.managed.is_read_only());
}

#[test]
fn test_shared_type_map_always_rejected() {
    let fixture = Fixture::new();
    let first = fixture.connection();
    let _second = fixture.connection();

    let err = first.set_type_map(first.type_map().unwrap()).unwrap_err();

    assert!(err.is_sharing_violation());
}

#[test]
fn test_match_current_state_updates_request_info() {
    let fixture = Fixture::with_config(|b| b.connection_sharing(ConnectionSharing::MatchCurrentState));
    let conn = fixture.connection();

    conn.set_read_only(true).unwrap();
    conn.set_catalog("SALES").unwrap();
    conn.set_transaction_isolation(IsolationLevel::Serializable)
        .unwrap();

    let info = fixture.managed.request_info();
    assert!(info.is_changeable());
    assert_eq!(info.read_only, Some(true));
    assert_eq!(info.catalog.as_deref(), Some("SALES"));
    assert_eq!(info.isolation, Some(IsolationLevel::Serializable));
}

#[test]
fn test_match_original_request_keeps_request_info() {
    let fixture = Fixture::new();
    let conn = fixture.connection();

    conn.set_read_only(true).unwrap();
    conn.set_holdability(Holdability::HoldCursorsOverCommit)
        .unwrap();

    assert!(conn.is_read_only().unwrap());
    assert_eq!(fixture.managed.request_info(), ConnectionRequestInfo::new());
    assert!(!fixture.managed.request_info().is_changeable());
}

// ═══════════════════════════════════════════════════════════════════════════
// Holdability
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_commit_closes_cursors_by_default() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.set_auto_commit(false).unwrap();
    let first = conn.create_statement().unwrap().execute_query("SELECT 1").unwrap();
    let second = conn.create_statement().unwrap().execute_query("SELECT 2").unwrap();

    conn.commit().unwrap();

    assert!(first.is_closed());
    assert!(second.is_closed());
    assert_eq!(conn.open_statements(), 2);
}

#[test]
fn test_commit_keeps_held_cursors() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    conn.set_holdability(Holdability::HoldCursorsOverCommit)
        .unwrap();
    conn.set_auto_commit(false).unwrap();
    let first = conn.create_statement().unwrap().execute_query("SELECT 1").unwrap();
    let second = conn.create_statement().unwrap().execute_query("SELECT 2").unwrap();

    conn.commit().unwrap();

    assert!(!first.is_closed());
    assert!(!second.is_closed());
    first.navigate(Navigation::BeforeFirst).unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════
// Closed wrappers
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_every_wrapper_reports_closed_after_connection_close() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    let stmt = conn.create_statement().unwrap();
    let rs = stmt.execute_query("SELECT 1").unwrap();
    let call = conn.prepare_call("CALL P(?)").unwrap();
    let metadata = conn.metadata().unwrap();

    conn.close().unwrap();

    assert!(conn.commit().unwrap_err().is_closed());
    assert!(conn.create_statement().unwrap_err().is_closed());
    assert!(conn.set_read_only(true).unwrap_err().is_closed());
    assert!(stmt.execute("SELECT 1").unwrap_err().is_closed());
    assert!(rs.next().unwrap_err().is_closed());
    assert!(call.out_parameter(1).unwrap_err().is_closed());
    assert!(metadata.database_product_name().unwrap_err().is_closed());
    assert!(
        metadata
            .query(&MetadataQuery::Catalogs)
            .unwrap_err()
            .is_closed()
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Exception mapping
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_connection_error_fires_event() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    fixture.driver.fail_on(
        "create_statement",
        DriverError::new("connection reset").with_sql_state("08006"),
    );

    let err = conn.create_statement().unwrap_err();

    assert!(err.is_connection_failure());
    assert!(err.is_recoverable());
    assert_eq!(fixture.listener.names(), vec!["CONNECTION_ERROR_OCCURRED"]);
}

#[test]
fn test_ordinary_driver_error_is_not_an_event() {
    let fixture = Fixture::new();
    let conn = fixture.connection();
    fixture.driver.fail_on(
        "prepare_statement",
        DriverError::new("syntax error").with_sql_state("42000"),
    );

    let err = conn.prepare_statement("SELEC 1").unwrap_err();

    assert!(err.is_driver());
    assert_eq!(err.sql_state(), Some("42000"));
    assert!(fixture.listener.names().is_empty());
    assert_eq!(conn.open_statements(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// Multithreaded access
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_multithreaded_access_detected() {
    let fixture = Fixture::with_config(|b| b.enable_multithreaded_access_detection(true));
    let conn = fixture.connection();
    conn.create_statement().unwrap();
    assert!(!fixture.factory.has_detected_multithreaded_access());

    thread::scope(|s| {
        s.spawn(|| {
            conn.create_statement().unwrap();
        });
    });

    assert!(fixture.factory.has_detected_multithreaded_access());
}

#[test]
fn test_multithreaded_access_ignored_when_disabled() {
    let fixture = Fixture::new();
    let conn = fixture.connection();

    thread::scope(|s| {
        s.spawn(|| {
            conn.create_statement().unwrap();
        });
    });

    assert!(!fixture.factory.has_detected_multithreaded_access());
}

#[test]
fn test_set_thread_id_transfers_ownership() {
    let fixture = Fixture::with_config(|b| b.enable_multithreaded_access_detection(true));
    let conn = fixture.connection();
    let key = fixture.factory.access_key();

    thread::scope(|s| {
        s.spawn(|| {
            conn.set_thread_id(key).unwrap();
            conn.create_statement().unwrap();
        });
    });

    assert!(!fixture.factory.has_detected_multithreaded_access());
}

// ═══════════════════════════════════════════════════════════════════════════
// Vendor interfaces
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_vendor_interface_requires_registration() {
    let fixture = Fixture::new();
    let conn = fixture.connection();

    assert!(!conn.is_wrapper_for::<MockConnection>().unwrap());
    assert!(conn.unwrap::<MockConnection>().unwrap_err().is_not_supported());
}

#[test]
fn test_vendor_interface_forwards_to_physical_connection() {
    let fixture = Fixture::new();
    fixture
        .factory
        .capabilities()
        .register::<MockConnection>("MockConnection");
    let conn = fixture.connection();

    let vendor = conn.unwrap::<MockConnection>().unwrap();
    let prepared = vendor
        .with(|c| c.driver().calls_named("prepare_statement"))
        .unwrap();

    assert_eq!(prepared, 0);
    assert_eq!(vendor.name(), "MockConnection");
    assert!(conn.is_wrapper_for::<MockConnection>().unwrap());
}

#[test]
fn test_vendor_interface_closed_after_moving_to_other_driver() {
    let fixture = Fixture::new();
    fixture
        .factory
        .capabilities()
        .register::<MockConnection>("MockConnection");
    let conn = fixture.connection();
    let vendor = conn.unwrap::<MockConnection>().unwrap();

    conn.dissociate().unwrap();
    let other = fixture
        .factory
        .create_managed_connection(
            fixture.driver.connection_as::<OtherVendor>(),
            ConnectionRequestInfo::new(),
        )
        .unwrap();
    fixture.manager.set_target(other);
    conn.activate().unwrap();

    assert!(vendor.is_closed());
    assert!(vendor.with(|_| ()).unwrap_err().is_closed());
    assert!(!conn.is_wrapper_for::<MockConnection>().unwrap());
}

#[test]
fn test_vendor_interface_closed_with_handle() {
    let fixture = Fixture::new();
    fixture
        .factory
        .capabilities()
        .register::<MockConnection>("MockConnection");
    let conn = fixture.connection();
    let vendor = conn.unwrap::<MockConnection>().unwrap();

    conn.close().unwrap();

    assert!(vendor.is_closed());
}
