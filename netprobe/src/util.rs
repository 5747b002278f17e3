use probe_engine::metrics::ProtocolMetrics;

pub fn print_protocol_stats(summary: &[ProtocolMetrics]) {
    println!("--- Protocol stats ---");
    for metrics in summary {
        let totals = &metrics.totals;
        println!("* {}", metrics.name);
        println!(
            "  * Captured frames: {} ({} estimated lost)",
            metrics.packets_total, metrics.packets_lost
        );

        if totals.measurement_count == 0 {
            println!("  * Not measured");
            continue;
        }

        println!("  * Measurements: {}", totals.measurement_count);
        println!("    | Average latency: {:.2} ms", totals.avg_latency_ms());
        println!(
            "    | Average throughput: {:.3} KB/s",
            totals.avg_throughput_kbps()
        );
    }
}
