#[cfg(not(feature = "integration"))]
#[test]
fn integration_tests_disabled() {
    // Enable with: cargo test --features integration
    // The fork test also needs a local `anvil` binary on PATH.
}

#[cfg(feature = "integration")]
mod integration {
    use std::time::Duration;

    use alloy::providers::Provider;
    use testcontainers_modules::anvil::{AnvilNode, ANVIL_PORT};
    use testcontainers_modules::testcontainers::runners::AsyncRunner;
    use testcontainers_modules::testcontainers::ContainerAsync;

    use fork_manager::{
        ChainConfig, ChainManager, ChainState, MultiChainConfig, NodeCommand, RpcProbe,
    };

    async fn anvil_rpc_url(node: &ContainerAsync<AnvilNode>) -> String {
        let port = node.get_host_port_ipv4(ANVIL_PORT).await.unwrap();
        format!("http://localhost:{port}")
    }

    #[tokio::test]
    async fn rpc_probe_sees_anvil_container() {
        let node = AnvilNode::latest().start().await.unwrap();
        let rpc_url = anvil_rpc_url(&node).await;

        let manager = ChainManager::builder().probe(RpcProbe).build();
        manager
            .wait_for_network(&rpc_url, Some(Duration::from_secs(10)))
            .await
            .expect("anvil should answer eth_blockNumber");
    }

    #[tokio::test]
    async fn default_chain_attaches_to_container_node() {
        let node = AnvilNode::latest().start().await.unwrap();
        let port = node.get_host_port_ipv4(ANVIL_PORT).await.unwrap();

        let manager = ChainManager::builder().default_chain("local", port).build();
        manager
            .setup_chains(&["local"], &MultiChainConfig::default(), None)
            .await
            .unwrap();

        let provider = manager.require_provider("local").unwrap();
        assert_eq!(provider.get_block_number().await.unwrap(), 0);
        assert!(manager.active_processes().is_empty());
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn forks_container_chain_with_local_anvil() {
        let node = AnvilNode::latest().start().await.unwrap();
        let rpc_url = anvil_rpc_url(&node).await;

        let manager = ChainManager::builder()
            .launcher(NodeCommand::anvil())
            .base_port(18546)
            .fork_ready_timeout(Duration::from_secs(30))
            .build();
        let config = MultiChainConfig::default()
            .add_chain("upstream", ChainConfig::with_rpc_url(rpc_url).chain_id(4242));

        let dir = tempfile::tempdir().unwrap();
        manager
            .setup_chains(&["upstream"], &config, Some(dir.path()))
            .await
            .unwrap();

        assert_eq!(manager.get_chain_status("upstream"), ChainState::Running);
        let provider = manager.require_provider("upstream").unwrap();
        assert_eq!(provider.get_chain_id().await.unwrap(), 4242);

        let report = manager.cleanup().await;
        assert_eq!(report.terminated, ["upstream"]);
        assert!(report.is_clean());
        assert!(dir.path().join("upstream-node.log").exists());
    }
}
