use crate::{
    messages::{request::KeyOperation, response::ResponseTuple, Request},
    nodes::storage::{PendingRequest, StorageNode},
    placement::PlacementOracle,
    Key, MeldError,
};
use std::time::Instant;

impl<P: PlacementOracle> StorageNode<P> {
    /// Handles incoming request messages.
    ///
    /// Each tuple is either serviced (if this thread is responsible for its
    /// key), answered with [`MeldError::WrongThread`] (if another thread is),
    /// or deferred into the pending-request map while the key's replication
    /// factors are fetched.
    pub async fn request_handler(&mut self, request: Request) -> eyre::Result<()> {
        let work_start = Instant::now();

        let mut response = request.new_response();

        let response_addr = request.response_address;
        let response_id = request.request_id;

        for tuple in request.request.into_tuples() {
            // first check if this thread is responsible for the key
            let key = tuple.key().clone();

            let threads = self.placement.responsible_threads(
                &key,
                &self.key_replication_map,
                &[self.config_data.self_tier],
            )?;

            match threads {
                None => {
                    // we don't know which threads are responsible, so we issue
                    // a replication factor request and defer the work
                    if let Key::Client(client_key) = &key {
                        self.issue_replication_factor_request(client_key.clone())
                            .await?;
                    }

                    let ty = tuple.response_ty();
                    let (lattice_type, payload) = tuple.into_parts();
                    self.pending_requests
                        .entry(key)
                        .or_default()
                        .push(PendingRequest {
                            ty,
                            lattice_type,
                            payload,
                            addr: response_addr.clone(),
                            response_id: response_id.clone(),
                        });
                }
                Some(threads) if !threads.contains(&self.wt) => {
                    // the routing info of the sender is stale
                    let (lattice_type, payload) = tuple.into_parts();
                    response.tuples.push(ResponseTuple {
                        key,
                        lattice_type,
                        payload,
                        error: Some(MeldError::WrongThread),
                        invalidate: Default::default(),
                    });
                }
                Some(threads) => {
                    let mut tp = ResponseTuple {
                        key: key.clone(),
                        lattice_type: None,
                        payload: None,
                        error: None,
                        invalidate: false,
                    };

                    match tuple {
                        KeyOperation::Get(_) => match self.process_get(&key) {
                            Ok((lattice_type, payload)) => {
                                tp.lattice_type = Some(lattice_type);
                                tp.payload = Some(payload);
                            }
                            Err(err) => tp.error = Some(err),
                        },
                        KeyOperation::Put(put) => {
                            if self.lattice_type_conflict(&key, put.lattice_type) {
                                log::error!(
                                    "lattice type mismatch for key {}: query is {:?} but we \
                                    expect {:?}",
                                    key,
                                    put.lattice_type,
                                    self.key_properties[&key].lattice_type,
                                );
                                tp.error = Some(MeldError::Lattice);
                            } else {
                                match self.process_put(&key, put.lattice_type, &put.payload) {
                                    Ok(_) => {
                                        tp.lattice_type = Some(put.lattice_type);
                                        self.local_changeset.insert(key.clone());
                                    }
                                    Err(err) => tp.error = Some(err),
                                }
                            }
                        }
                    }

                    if let Key::Client(client_key) = &key {
                        if let Some(&address_cache_size) =
                            request.address_cache_size.get(client_key)
                        {
                            if address_cache_size != threads.len() {
                                tp.invalidate = true;
                            }
                        }
                    }

                    response.tuples.push(tp);

                    self.report_data.record_key_access(&key, Instant::now());
                }
            }
        }

        let time_elapsed = Instant::now() - work_start;
        self.report_data.record_working_time(time_elapsed, 3);

        if let Some(response_addr) = response_addr {
            if !response.tuples.is_empty() {
                self.send_response(&response_addr, &response).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use zenoh::prelude::{Receiver, ZFuture};

    use crate::{
        lattice::{
            causal::{SingleKeyCausalLattice, VectorClock, VectorClockValuePair},
            last_writer_wins::Timestamp,
            Lattice, LastWriterWinsLattice, MaxLattice, OrderedSetLattice, PriorityLattice,
            SetLattice,
        },
        messages::{
            request::{PutTuple, RequestData},
            response::ResponseType,
            Request, Response,
        },
        nodes::storage::{storage_test_instance, storage_test_instance_with},
        placement::FixedPlacement,
        topics::{ClientThread, StorageThread},
        zenoh_test_instance, ClientKey, LatticeType, MeldError, ZenohValueAsString,
    };

    use std::{
        collections::{BTreeSet, HashSet},
        time::Duration,
    };

    fn get_key_request(
        key: ClientKey,
        node_id: String,
        request_id: String,
        zenoh_prefix: &str,
    ) -> Request {
        Request {
            request: RequestData::Get {
                keys: vec![key.into()],
            },
            response_address: Some(ClientThread::new(node_id, 0).response_topic(zenoh_prefix)),
            request_id: Some(request_id),
            address_cache_size: Default::default(),
        }
    }

    fn put_key_request(
        key: ClientKey,
        lattice_type: LatticeType,
        payload: Vec<u8>,
        node_id: String,
        request_id: String,
        zenoh_prefix: &str,
    ) -> Request {
        Request {
            request: RequestData::Put {
                tuples: vec![PutTuple {
                    key: key.into(),
                    lattice_type,
                    payload,
                }],
            },
            response_address: Some(ClientThread::new(node_id, 0).response_topic(zenoh_prefix)),
            request_id: Some(request_id),
            address_cache_size: Default::default(),
        }
    }

    fn payload<L: serde::Serialize>(lattice: &L) -> Vec<u8> {
        serde_json::to_vec(lattice).unwrap()
    }

    #[test]
    fn put_and_get_lww_converges_to_newest_write() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        assert_eq!(server.local_changeset.len(), 0);

        // a write with timestamp 5 followed by a write with timestamp 3
        let newer = LastWriterWinsLattice::from_pair(Timestamp::from_micros(5), b"a".to_vec());
        let older = LastWriterWinsLattice::from_pair(Timestamp::from_micros(3), b"b".to_vec());
        for (i, value) in [&newer, &older].iter().enumerate() {
            let put_request = put_key_request(
                key.clone(),
                LatticeType::Lww,
                payload(value),
                server.node_id.clone(),
                format!("put_{}", i),
                &zenoh_prefix,
            );
            smol::block_on(server.request_handler(put_request)).unwrap();
            let message = subscriber
                .receiver()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
            let response: Response =
                serde_json::from_str(&message.value.as_string().unwrap()).unwrap();
            assert_eq!(response.tuples[0].error, None);
        }

        assert_eq!(server.local_changeset.len(), 1);

        let get_request = get_key_request(
            key.clone(),
            server.node_id.clone(),
            "get".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(get_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();

        assert_eq!(response.response_id.as_deref(), Some("get"));
        assert_eq!(response.tuples.len(), 1);

        let rtp = &response.tuples[0];
        assert_eq!(rtp.key, key.clone().into());
        assert_eq!(rtp.error, None);
        assert_eq!(rtp.lattice_type, Some(LatticeType::Lww));

        let stored: LastWriterWinsLattice<Vec<u8>> =
            serde_json::from_slice(rtp.payload.as_ref().unwrap()).unwrap();
        assert_eq!(stored.reveal().value(), &b"a".to_vec());

        assert_eq!(server.report_data.access_count(), 3);
        assert_eq!(server.report_data.key_access_count(&key.into()), 3);
    }

    #[test]
    fn put_and_get_set_takes_the_union() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let first = SetLattice::new([b"x".to_vec(), b"y".to_vec()].iter().cloned().collect());
        let second = SetLattice::new([b"y".to_vec(), b"z".to_vec()].iter().cloned().collect());
        for (i, value) in [&first, &second].iter().enumerate() {
            let put_request = put_key_request(
                key.clone(),
                LatticeType::Set,
                payload(value),
                server.node_id.clone(),
                format!("put_{}", i),
                &zenoh_prefix,
            );
            smol::block_on(server.request_handler(put_request)).unwrap();
            subscriber
                .receiver()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
        }

        let get_request = get_key_request(
            key.clone(),
            server.node_id.clone(),
            "get".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(get_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();

        let rtp = &response.tuples[0];
        assert_eq!(rtp.error, None);
        let stored: SetLattice<Vec<u8>> =
            serde_json::from_slice(rtp.payload.as_ref().unwrap()).unwrap();
        let union: HashSet<Vec<u8>> = [b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]
            .iter()
            .cloned()
            .collect();
        assert_eq!(stored.reveal(), &union);
    }

    #[test]
    fn put_and_get_ordered_set() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let values: BTreeSet<Vec<u8>> = [b"v2".to_vec(), b"v1".to_vec(), b"v3".to_vec()]
            .iter()
            .cloned()
            .collect();
        let lattice = OrderedSetLattice::new(values.clone());

        let put_request = put_key_request(
            key.clone(),
            LatticeType::OrderedSet,
            payload(&lattice),
            server.node_id.clone(),
            "put".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(put_request)).unwrap();
        subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();

        let get_request = get_key_request(
            key.clone(),
            server.node_id.clone(),
            "get".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(get_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();

        let rtp = &response.tuples[0];
        assert_eq!(rtp.error, None);
        let stored: OrderedSetLattice<Vec<u8>> =
            serde_json::from_slice(rtp.payload.as_ref().unwrap()).unwrap();
        assert_eq!(stored.reveal(), &values);
    }

    #[test]
    fn causal_put_of_dominating_write_replaces_value() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let first = {
            let mut clock = VectorClock::default();
            clock.insert("A".into(), MaxLattice::new(1));
            let mut value = SetLattice::default();
            value.insert(b"a".to_vec());
            SingleKeyCausalLattice::new(VectorClockValuePair::new(clock, value))
        };
        let second = {
            let mut clock = VectorClock::default();
            clock.insert("A".into(), MaxLattice::new(1));
            clock.insert("B".into(), MaxLattice::new(1));
            let mut value = SetLattice::default();
            value.insert(b"b".to_vec());
            SingleKeyCausalLattice::new(VectorClockValuePair::new(clock, value))
        };

        for (i, value) in [&first, &second].iter().enumerate() {
            let put_request = put_key_request(
                key.clone(),
                LatticeType::SingleCausal,
                payload(value),
                server.node_id.clone(),
                format!("put_{}", i),
                &zenoh_prefix,
            );
            smol::block_on(server.request_handler(put_request)).unwrap();
            subscriber
                .receiver()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
        }

        let get_request = get_key_request(
            key.clone(),
            server.node_id.clone(),
            "get".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(get_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();

        let rtp = &response.tuples[0];
        assert_eq!(rtp.error, None);
        let stored: SingleKeyCausalLattice<SetLattice<Vec<u8>>> =
            serde_json::from_slice(rtp.payload.as_ref().unwrap()).unwrap();

        // the second write causally follows the first, so its value wins
        assert_eq!(
            stored.reveal().value.reveal(),
            &[b"b".to_vec()].iter().cloned().collect::<HashSet<_>>()
        );
        assert_eq!(
            stored.reveal().vector_clock.reveal().get("B"),
            Some(&MaxLattice::new(1))
        );
    }

    #[test]
    fn put_and_get_priority_keeps_the_minimum() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let first = PriorityLattice::from_pair(5.0, b"a".to_vec());
        let second = PriorityLattice::from_pair(2.0, b"b".to_vec());
        for (i, value) in [&first, &second].iter().enumerate() {
            let put_request = put_key_request(
                key.clone(),
                LatticeType::Priority,
                payload(value),
                server.node_id.clone(),
                format!("put_{}", i),
                &zenoh_prefix,
            );
            smol::block_on(server.request_handler(put_request)).unwrap();
            subscriber
                .receiver()
                .recv_timeout(Duration::from_secs(5))
                .unwrap();
        }

        let get_request = get_key_request(
            key.clone(),
            server.node_id.clone(),
            "get".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(get_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();

        let rtp = &response.tuples[0];
        assert_eq!(rtp.error, None);
        let stored: PriorityLattice<f64, Vec<u8>> =
            serde_json::from_slice(rtp.payload.as_ref().unwrap()).unwrap();
        assert_eq!(stored.reveal().value, b"b".to_vec());
    }

    #[test]
    fn get_of_unknown_key_returns_key_dne() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let get_request = get_key_request(
            key.clone(),
            server.node_id.clone(),
            "get".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(get_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();

        assert_eq!(response.tuples[0].error, Some(MeldError::KeyDoesNotExist));
    }

    #[test]
    fn put_with_conflicting_lattice_type_is_rejected() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let lww = LastWriterWinsLattice::from_pair(Timestamp::from_micros(1), b"a".to_vec());
        let put_request = put_key_request(
            key.clone(),
            LatticeType::Lww,
            payload(&lww),
            server.node_id.clone(),
            "put_lww".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(put_request)).unwrap();
        subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();

        // a PUT declaring a different lattice type must fail without mutating
        let set = SetLattice::new([b"x".to_vec()].iter().cloned().collect());
        let put_request = put_key_request(
            key.clone(),
            LatticeType::Set,
            payload(&set),
            server.node_id.clone(),
            "put_set".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(put_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();
        assert_eq!(response.tuples[0].error, Some(MeldError::Lattice));

        // the stored value is unchanged
        let (lattice_type, stored) = server.process_get(&key.clone().into()).unwrap();
        assert_eq!(lattice_type, LatticeType::Lww);
        let stored: LastWriterWinsLattice<Vec<u8>> = serde_json::from_slice(&stored).unwrap();
        assert_eq!(stored, lww);
    }

    #[test]
    fn request_to_non_responsible_thread_returns_wrong_thread() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut subscriber = zenoh
            .subscribe(format!("{}/**", zenoh_prefix))
            .wait()
            .unwrap();

        // the oracle places every key on some other node
        let placement = FixedPlacement {
            threads: vec![StorageThread::new("other_node".to_owned(), 0)],
        };
        let key: ClientKey = "key".into();
        let mut server = storage_test_instance_with(placement, zenoh.clone(), zenoh_prefix.clone());
        server.key_replication_map.entry(key.clone()).or_default();

        let lww = LastWriterWinsLattice::from_pair(Timestamp::from_micros(1), b"a".to_vec());
        let put_request = put_key_request(
            key.clone(),
            LatticeType::Lww,
            payload(&lww),
            server.node_id.clone(),
            "put".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(put_request)).unwrap();

        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let response: Response = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();

        assert_eq!(response.ty, ResponseType::Put);
        assert_eq!(response.tuples[0].error, Some(MeldError::WrongThread));

        // no local state was touched
        assert!(server.key_properties.is_empty());
        assert_eq!(server.local_changeset.len(), 0);
    }

    #[test]
    fn unknown_replication_defers_the_request_and_issues_a_fetch() {
        let zenoh = zenoh_test_instance();
        let zenoh_prefix = uuid::Uuid::new_v4().to_string();
        let mut server = storage_test_instance(zenoh.clone(), zenoh_prefix.clone());

        // subscribe to our own request topic: the test node is responsible for
        // the replication metadata key, so the fetch arrives here
        let mut subscriber = zenoh
            .subscribe(server.wt.request_topic(&zenoh_prefix))
            .wait()
            .unwrap();

        let key: ClientKey = "key".into();
        let get_request = get_key_request(
            key.clone(),
            server.node_id.clone(),
            "get".to_owned(),
            &zenoh_prefix,
        );
        smol::block_on(server.request_handler(get_request)).unwrap();

        // the request is deferred, not answered
        assert_eq!(server.pending_requests.len(), 1);
        assert!(server
            .pending_requests
            .contains_key(&key.clone().into()));

        // and a metadata GET for the replication key was issued
        let message = subscriber
            .receiver()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let fetch: Request = serde_json::from_str(&message.value.as_string().unwrap()).unwrap();
        match fetch.request {
            RequestData::Get { keys } => assert_eq!(
                keys,
                vec![crate::metadata::MetadataKey::Replication { key }.into()]
            ),
            other => panic!("expected Get request, got {:?}", other),
        }
    }
}
